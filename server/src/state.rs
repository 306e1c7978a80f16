//! Server lifecycle states.

/// Rate server operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Server is built but the rate table has not been primed.
    Starting,
    /// Server is running and accepting connections.
    Running,
    /// Server is draining connections, not accepting new ones.
    ShuttingDown,
    /// Server is stopped.
    Stopped,
}

impl ServerState {
    /// Check if the server is accepting new connections.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServerState::Running)
    }

    /// Check if the server is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts_requests() {
        assert!(ServerState::Running.accepts_requests());
        assert!(!ServerState::Starting.accepts_requests());
        assert!(!ServerState::ShuttingDown.accepts_requests());
        assert!(ServerState::Stopped.is_terminal());
        assert!(!ServerState::ShuttingDown.is_terminal());
    }
}
