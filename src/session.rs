//! The repeat/keepalive iteration policy shared by client and server
//! fixtures (component L6).

/// Per-fixture session knobs: how many times to iterate the connect/process
/// cycle, and whether to reuse one connection across iterations.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    repeat: u32,
    keepalive: bool,
    rcvbuf: Option<u32>,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            repeat: 1,
            keepalive: false,
            rcvbuf: None,
        }
    }
}

impl Session {
    /// Set the iteration count (`-repeat N`, must be >= 1).
    pub fn set_repeat(&mut self, n: u32) {
        self.repeat = n.max(1);
    }

    /// Enable connection reuse across iterations (`-keepalive`).
    pub fn set_keepalive(&mut self, on: bool) {
        self.keepalive = on;
    }

    /// Record a receive-buffer size hint (`-rcvbuf N`).
    pub fn set_rcvbuf(&mut self, n: u32) {
        self.rcvbuf = Some(n);
    }

    /// How many iterations to run.
    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Whether the connection should be kept open across iterations.
    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    /// The configured receive-buffer hint, if any.
    pub fn rcvbuf(&self) -> Option<u32> {
        self.rcvbuf
    }

    /// Whether the connection must be closed and redialed/reaccepted between
    /// iteration `i` and `i + 1`.
    pub fn closes_between_iterations(&self) -> bool {
        !self.keepalive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_iteration_no_keepalive() {
        let s = Session::default();
        assert_eq!(s.repeat(), 1);
        assert!(s.closes_between_iterations());
    }

    #[test]
    fn keepalive_session_does_not_close_between_iterations() {
        let mut s = Session::default();
        s.set_keepalive(true);
        assert!(!s.closes_between_iterations());
    }

    #[test]
    fn repeat_is_clamped_to_at_least_one() {
        let mut s = Session::default();
        s.set_repeat(0);
        assert_eq!(s.repeat(), 1);
    }
}
