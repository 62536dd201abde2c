#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Payload of {len} bytes does not fit in a 16-bit length")]
    PayloadTooLong { len: usize },

    #[error("Unknown command byte {0:#04x}")]
    UnknownCommand(u8),

    #[error("Field `{field}` needs {expected} bytes, only {available} left")]
    Truncated {
        field: &'static str,
        expected: usize,
        available: usize,
    },

    #[error("Command '{0}' is not valid in a reply")]
    UnexpectedCommand(char),

    #[error("Field `{0}` missing from decoded frame")]
    MissingField(&'static str),

    #[error("Tick count {0} does not fit in 24 bits")]
    TickOverflow(u32),

    #[error("Frame addressed from node {found:?}, expected {expected:?}")]
    NodeMismatch { expected: String, found: String },

    #[error("Command '{command}' carries {len} payload bytes, expected {expected}")]
    PayloadLength {
        command: char,
        len: usize,
        expected: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
