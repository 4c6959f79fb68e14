//! Per-connection lifecycle
//!
//! ```text
//! New --Handshake + accepted--> Handshaking --HandshakeAck--> Working
//!  |                                 |                          |
//!  +--rejected / other packet--------+--other packet------------+--close--> Closed
//! ```
//!
//! The machine only decides what a packet means in the current state; the
//! connection handler performs the side effects.

use ng_core::{SessionError, SessionState};
use ng_protocol::PacketType;

/// What the connection handler should do with an accepted packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run the handshake validator on the body
    Validate,
    /// Handshake completed, the session is now working
    Ready,
    /// Refresh liveness
    Heartbeat,
    /// Decode the body as a message and dispatch it
    Dispatch,
    /// Nothing to do
    Ignore,
}

/// Session state machine
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
}

impl SessionMachine {
    /// Create a machine in the `New` state
    pub fn new() -> Self {
        Self {
            state: SessionState::New,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Classify an incoming packet.
    ///
    /// Packets the current state does not allow close the machine and yield
    /// a `ProtocolViolation`.
    pub fn on_packet(&mut self, packet: PacketType) -> Result<Action, SessionError> {
        let action = match (self.state, packet) {
            (SessionState::Closed, _) => return Err(SessionError::Closed),

            (SessionState::New, PacketType::Handshake) => Action::Validate,

            (SessionState::Handshaking, PacketType::HandshakeAck) => {
                self.state = SessionState::Working;
                Action::Ready
            }

            (SessionState::Working, PacketType::Data) => Action::Dispatch,
            (SessionState::Working, PacketType::Heartbeat) => Action::Heartbeat,
            (SessionState::Working, _) => Action::Ignore,

            (state, packet) => {
                self.state = SessionState::Closed;
                return Err(SessionError::ProtocolViolation { state, packet });
            }
        };

        Ok(action)
    }

    /// The validator accepted the handshake
    pub fn accept_handshake(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::New => {
                self.state = SessionState::Handshaking;
                Ok(())
            }
            SessionState::Closed => Err(SessionError::Closed),
            state => {
                self.state = SessionState::Closed;
                Err(SessionError::ProtocolViolation {
                    state,
                    packet: PacketType::Handshake,
                })
            }
        }
    }

    /// The validator rejected the handshake
    pub fn reject_handshake(&mut self, reason: impl Into<String>) -> SessionError {
        self.state = SessionState::Closed;
        SessionError::Unauthorized(reason.into())
    }

    /// Move to `Closed`
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn working() -> SessionMachine {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.on_packet(PacketType::Handshake), Ok(Action::Validate));
        machine.accept_handshake().unwrap();
        assert_eq!(machine.on_packet(PacketType::HandshakeAck), Ok(Action::Ready));
        machine
    }

    #[test]
    fn test_happy_path() {
        let mut machine = working();
        assert_eq!(machine.state(), SessionState::Working);
        assert_eq!(machine.on_packet(PacketType::Data), Ok(Action::Dispatch));
        assert_eq!(machine.on_packet(PacketType::Heartbeat), Ok(Action::Heartbeat));
    }

    #[test]
    fn test_handshake_pending_validation_stays_new() {
        let mut machine = SessionMachine::new();
        machine.on_packet(PacketType::Handshake).unwrap();
        assert_eq!(machine.state(), SessionState::New);
    }

    #[test]
    fn test_data_before_handshake_closes() {
        let mut machine = SessionMachine::new();
        let err = machine.on_packet(PacketType::Data).unwrap_err();
        assert_eq!(
            err,
            SessionError::ProtocolViolation {
                state: SessionState::New,
                packet: PacketType::Data,
            }
        );
        assert_eq!(machine.state(), SessionState::Closed);
    }

    #[test]
    fn test_data_while_handshaking_closes() {
        let mut machine = SessionMachine::new();
        machine.on_packet(PacketType::Handshake).unwrap();
        machine.accept_handshake().unwrap();

        let err = machine.on_packet(PacketType::Data).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProtocolViolation {
                state: SessionState::Handshaking,
                packet: PacketType::Data
            }
        ));
        assert_eq!(machine.state(), SessionState::Closed);
    }

    #[test]
    fn test_ack_without_handshake_closes() {
        let mut machine = SessionMachine::new();
        assert!(machine.on_packet(PacketType::HandshakeAck).is_err());
        assert_eq!(machine.state(), SessionState::Closed);
    }

    #[test]
    fn test_rejected_handshake() {
        let mut machine = SessionMachine::new();
        machine.on_packet(PacketType::Handshake).unwrap();
        let err = machine.reject_handshake("bad token");
        assert_eq!(err, SessionError::Unauthorized("bad token".into()));
        assert_eq!(machine.state(), SessionState::Closed);
    }

    #[test]
    fn test_working_ignores_repeated_handshake_and_kick() {
        let mut machine = working();
        assert_eq!(machine.on_packet(PacketType::Handshake), Ok(Action::Ignore));
        assert_eq!(machine.on_packet(PacketType::HandshakeAck), Ok(Action::Ignore));
        assert_eq!(machine.on_packet(PacketType::Kick), Ok(Action::Ignore));
        assert_eq!(machine.state(), SessionState::Working);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut machine = working();
        machine.close();
        assert_eq!(machine.on_packet(PacketType::Data), Err(SessionError::Closed));
        assert_eq!(machine.on_packet(PacketType::Handshake), Err(SessionError::Closed));
        assert_eq!(machine.accept_handshake(), Err(SessionError::Closed));
        assert_eq!(machine.state(), SessionState::Closed);
    }
}
