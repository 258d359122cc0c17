/// What went wrong with a port operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortErrorKind {
    /// The requested mode is not supported by this port's direction
    /// capabilities or flags.
    UnsupportedMode,
    /// The requested resolution is outside 8..=12 bits or not advertised.
    UnsupportedResolution,
    /// The requested reference is not switchable on this port.
    UnsupportedReference,
    /// The requested position/value is outside the valid range.
    PositionOutOfRange,
    /// The port's current value has expired and must be re-read.
    ValueExpired,
    /// The port's value is unavailable (e.g. hardware fault).
    ValueUnavailable,
    /// The port is read-only for external callers.
    AccessDenied,
    /// The operation does not apply to this port type.
    WrongPortType,
    /// Too many select items.
    TooManyItems,
    /// Invalid construction parameters (e.g. dial min >= max).
    InvalidRange,
    /// A streaming channel binding is invalid.
    InvalidChannel,
    /// A wire descriptor or state payload could not be parsed.
    InvalidDescriptor,
}

/// A port validation or state error, carrying the port ID and a
/// human-readable reason.
///
/// Port state is only mutated after all validation passes, so an error never
/// leaves a port half-updated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("port {port}: {reason}")]
pub struct PortError {
    pub kind: PortErrorKind,
    pub port: String,
    pub reason: String,
}

impl PortError {
    pub fn new(kind: PortErrorKind, port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            port: port.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PortError>;
