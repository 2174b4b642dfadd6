//! Optional caller-supplied allowlist consulted once per inbound connection
//! attempt, before a single byte is read off the socket (spec §6).

use std::net::SocketAddr;
use std::sync::Arc;

pub trait AccessControl: Send + Sync {
    fn allow(&self, remote: SocketAddr) -> bool;
}

impl<F> AccessControl for F
where
    F: Fn(SocketAddr) -> bool + Send + Sync,
{
    fn allow(&self, remote: SocketAddr) -> bool {
        self(remote)
    }
}

pub type SharedAccessControl = Arc<dyn AccessControl>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_implements_access_control() {
        let allow: SharedAccessControl = Arc::new(|addr: SocketAddr| addr.ip().is_loopback());
        let loopback: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let public: SocketAddr = "8.8.8.8:9".parse().unwrap();
        assert!(allow.allow(loopback));
        assert!(!allow.allow(public));
    }
}
