//! batproxy core library
//!
//! This crate provides the shared logic for the batproxy gateway: the proxy
//! rule model and its storage, the caching and logging decorators that wrap
//! the store, and the SSH session machinery the reverse proxy dials through.
//!
//! # Architecture
//!
//! The core is organized into several modules:
//!
//! - [`proxy`]: The rule model, identifier policy, and the `ProxyService`
//!   capability trait shared by the store and its decorators
//! - [`store`]: SQL-backed `ProxyService` with pagination and uniqueness
//! - [`cache`]: TTL cache decorator with negative entries
//! - [`logging`]: Per-operation timing/outcome decorator
//! - [`memo`]: Single-flight memoizer used for the SSH session cache
//! - [`ssh`]: SSH identities, dialing, and session liveness
//! - [`error`]: Domain error kinds and their HTTP status mapping

pub mod cache;
pub mod error;
pub mod logging;
pub mod memo;
pub mod proxy;
pub mod ssh;
pub mod store;

// Re-export commonly used items at the crate root
pub use error::{Error, ErrorKind, Result};
pub use proxy::{CreateProxyOptions, ListProxiesOptions, ListProxiesPage, Proxy, ProxyService};
