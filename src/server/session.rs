//! Per-client session state.

use parking_lot::Mutex;
use std::net::SocketAddr;

/// State carried by one client connection: created on accept,
/// destroyed when the socket closes.
///
/// Authentication is not a stored flag: the session remembers the
/// password the client last presented with AUTH, and the dispatcher
/// compares it against the configuration on every command.
#[derive(Debug)]
pub struct Session {
    addr: SocketAddr,
    admitted: bool,
    password: Mutex<Option<String>>,
}

impl Session {
    /// Create session state for a connection from `addr`. `admitted`
    /// is false when the connection arrived past the MaxClients limit;
    /// such a session receives the admission error for every command.
    pub fn new(addr: SocketAddr, admitted: bool) -> Self {
        Self {
            addr,
            admitted,
            password: Mutex::new(None),
        }
    }

    /// The client's remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection was admitted under the MaxClients limit.
    pub fn admitted(&self) -> bool {
        self.admitted
    }

    /// Remember the password presented by AUTH.
    pub fn set_password(&self, password: String) {
        *self.password.lock() = Some(password);
    }

    /// The password this session last presented, if any.
    pub fn password(&self) -> Option<String> {
        self.password.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let session = Session::new("127.0.0.1:4242".parse().unwrap(), true);
        assert_eq!(session.password(), None);
        session.set_password("pw".to_string());
        assert_eq!(session.password(), Some("pw".to_string()));
        assert!(session.admitted());
        assert_eq!(session.remote_addr().port(), 4242);
    }
}
