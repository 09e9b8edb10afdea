use std::fmt;
use std::path::PathBuf;

use batproxy_core::{Error, Result};

/// Manager listener address: `<scheme>://<addr>` with scheme one of
/// `unix`, `tcp`, `udp`; a bare address is treated as a unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(String),
    /// Accepted at parse time for compatibility; binding refuses it, HTTP
    /// needs a stream listener.
    Udp(String),
}

impl ListenAddr {
    pub fn parse(addr: &str) -> Result<Self> {
        match addr.split_once("://") {
            None => Ok(ListenAddr::Unix(PathBuf::from(addr))),
            Some(("unix", rest)) => Ok(ListenAddr::Unix(PathBuf::from(rest))),
            Some(("tcp", rest)) => Ok(ListenAddr::Tcp(rest.to_string())),
            Some(("udp", rest)) => Ok(ListenAddr::Udp(rest.to_string())),
            Some((network, _)) => Err(Error::invalid(format!("network: {network}"))),
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            ListenAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            ListenAddr::Udp(addr) => write!(f, "udp://{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batproxy_core::ErrorKind;

    #[test]
    fn test_parse_bare_address_is_unix() {
        assert_eq!(
            ListenAddr::parse("batproxy.sock").unwrap(),
            ListenAddr::Unix(PathBuf::from("batproxy.sock"))
        );
    }

    #[test]
    fn test_parse_schemes() {
        assert_eq!(
            ListenAddr::parse("unix:///run/batproxy.sock").unwrap(),
            ListenAddr::Unix(PathBuf::from("/run/batproxy.sock"))
        );
        assert_eq!(
            ListenAddr::parse("tcp://127.0.0.1:8080").unwrap(),
            ListenAddr::Tcp("127.0.0.1:8080".to_string())
        );
        assert_eq!(
            ListenAddr::parse("udp://127.0.0.1:8080").unwrap(),
            ListenAddr::Udp("127.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let err = ListenAddr::parse("ftp://x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert!(err.message.contains("ftp"));
    }
}
