use std::fmt;

use crate::error::ProtocolError;

/// Command byte carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Stop = b'0',
    DriveBoth = b'1',
    DriveEast = b'2',
    DriveWest = b'3',
    Update = b'U',
    Verbose = b'V',
    Error = b'E',
    Info = b'I',
    Warning = b'W',
    Status = b'S',
    SocketCount = b'C',
    ZeroDrives = b'R',
}

impl Command {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn as_char(self) -> char {
        char::from(self.byte())
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        let command = match value {
            b'0' => Command::Stop,
            b'1' => Command::DriveBoth,
            b'2' => Command::DriveEast,
            b'3' => Command::DriveWest,
            b'U' => Command::Update,
            b'V' => Command::Verbose,
            b'E' => Command::Error,
            b'I' => Command::Info,
            b'W' => Command::Warning,
            b'S' => Command::Status,
            b'C' => Command::SocketCount,
            b'R' => Command::ZeroDrives,
            other => return Err(ProtocolError::UnknownCommand(other)),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
