//! batproxy HTTP surfaces.
//!
//! Two listeners: the reverse proxy, which routes by Host label and tunnels
//! upstream through cached SSH sessions, and the manager, which exposes rule
//! CRUD as JSON under `/api/v1beta1`. [`server::Server`] supervises both.

pub mod access_log;
pub mod listen;
pub mod reverse_proxy;
pub mod routes;
pub mod server;
pub mod state;

pub use listen::ListenAddr;
pub use server::{Server, SHUTDOWN_TIMEOUT};
pub use state::AppState;
