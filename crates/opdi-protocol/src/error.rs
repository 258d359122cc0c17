/// Errors that can occur in protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] opdi_transport::TransportError),

    /// Framing-level error.
    #[error("frame error: {0}")]
    Frame(#[from] opdi_frame::FrameError),

    /// Port validation or state error.
    #[error("port error: {0}")]
    Port(#[from] opdi_port::PortError),

    /// The peer violated the protocol (wrong magic, wrong part count,
    /// unexpected channel or port ID in a reply). Not retryable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Authentication was rejected by the peer.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The peer disconnected.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// A synchronous exchange timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer reported a device error on the control channel.
    #[error("device error {code}: {message}")]
    Device { code: u8, message: String },

    /// The operation was aborted by the caller.
    #[error("operation aborted")]
    Aborted,

    /// A message would carry more parts than the protocol allows.
    #[error("too many message parts ({count}, max {max})")]
    TooManyParts { count: usize, max: usize },

    /// A device address could not be parsed.
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
