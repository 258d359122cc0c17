/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload contains the message terminator byte.
    #[error("message terminator may not appear in payload")]
    TerminatorInPayload,

    /// The encoded message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    BufferOverflow { size: usize, max: usize },

    /// The received checksum does not match the computed one.
    ///
    /// Carries both values for diagnostics; this is a transmission-integrity
    /// check, not a security control.
    #[error("message checksum invalid: computed {computed:04x}, expected {expected:04x}")]
    ChecksumInvalid { computed: u16, expected: u16 },

    /// The channel part could not be parsed as a number.
    #[error("message channel invalid: {0:?}")]
    ChannelInvalid(String),

    /// The message does not follow the `channel:payload:checksum` form.
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// An I/O error occurred while reading or writing messages.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,

    /// No complete message arrived within the receive timeout.
    #[error("timeout waiting for message after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, FrameError>;
