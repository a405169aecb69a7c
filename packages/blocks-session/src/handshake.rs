//! The API-mode handshake.
//!
//! Every step sends its commands and then waits for one ack before the next
//! step starts:
//!
//! 1. end API mode, then begin API mode
//! 2. begin API mode again (the firmware ignores the first request after a
//!    mode switch)
//! 3. start the heartbeat and ping immediately
//! 4. enable MPE
//! 5. ping
//! 6. upload the LED program and move the packet counter past it
//! 7. save the program as the power-on default

use std::fmt;

use crate::protocol::cmds::{
    DeviceCommand, BEGIN_API_MODE, ENABLE_MPE, END_API_MODE, PING, SAVE_PROGRAM,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStep {
    BeginApiMode,
    RepeatBeginApiMode,
    StartHeartbeat,
    EnableMpe,
    Ping,
    UploadLedProgram,
    SaveProgram,
}

impl HandshakeStep {
    /// Every step, in the order they run.
    pub const ALL: [Self; 7] = [
        Self::BeginApiMode,
        Self::RepeatBeginApiMode,
        Self::StartHeartbeat,
        Self::EnableMpe,
        Self::Ping,
        Self::UploadLedProgram,
        Self::SaveProgram,
    ];

    /// Fixed commands sent by this step. The LED program upload sends
    /// change-list packets instead and has none.
    pub fn commands(self) -> &'static [DeviceCommand] {
        match self {
            Self::BeginApiMode => &[END_API_MODE, BEGIN_API_MODE],
            Self::RepeatBeginApiMode => &[BEGIN_API_MODE],
            Self::StartHeartbeat | Self::Ping => &[PING],
            Self::EnableMpe => &[ENABLE_MPE],
            Self::UploadLedProgram => &[],
            Self::SaveProgram => &[SAVE_PROGRAM],
        }
    }

    pub const fn number(self) -> usize {
        self as usize + 1
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeginApiMode => "begin API mode",
            Self::RepeatBeginApiMode => "repeat begin API mode",
            Self::StartHeartbeat => "start heartbeat",
            Self::EnableMpe => "enable MPE",
            Self::Ping => "ping",
            Self::UploadLedProgram => "upload LED program",
            Self::SaveProgram => "save program",
        };
        write!(f, "step {} ({name})", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::HandshakeStep;
    use crate::protocol::cmds::{END_API_MODE, PING};

    #[test]
    fn step_table() {
        assert_eq!(HandshakeStep::BeginApiMode.commands()[0], END_API_MODE);
        assert_eq!(HandshakeStep::StartHeartbeat.commands(), &[PING]);
        assert!(HandshakeStep::UploadLedProgram.commands().is_empty());
        assert_eq!(
            HandshakeStep::SaveProgram.to_string(),
            "step 7 (save program)"
        );
    }
}
