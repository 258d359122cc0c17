//! Numeric status codes carried in `Err` control messages.

use opdi_port::{PortError, PortErrorKind};

use crate::error::ProtocolError;

pub const STATUS_OK: u8 = 0;
pub const DISCONNECTED: u8 = 1;
pub const TIMEOUT: u8 = 2;
pub const CANCELLED: u8 = 3;
pub const ERROR_MALFORMED_MESSAGE: u8 = 4;
pub const ERROR_CONVERSION: u8 = 5;
pub const ERROR_MSGBUF_OVERFLOW: u8 = 6;
pub const ERROR_PARTS_OVERFLOW: u8 = 9;
pub const PROTOCOL_ERROR: u8 = 10;
pub const PROTOCOL_NOT_SUPPORTED: u8 = 11;
pub const ENCRYPTION_NOT_SUPPORTED: u8 = 12;
pub const AUTH_NOT_SUPPORTED: u8 = 15;
pub const AUTHENTICATION_EXPECTED: u8 = 16;
pub const AUTHENTICATION_FAILED: u8 = 17;
pub const DEVICE_ERROR: u8 = 18;
pub const TOO_MANY_PORTS: u8 = 19;
pub const PORTTYPE_UNKNOWN: u8 = 20;
pub const PORT_UNKNOWN: u8 = 21;
pub const WRONG_PORT_TYPE: u8 = 22;
pub const TOO_MANY_BINDINGS: u8 = 23;
pub const NO_BINDING: u8 = 24;
pub const CHANNEL_INVALID: u8 = 25;
pub const POSITION_INVALID: u8 = 26;
pub const NETWORK_ERROR: u8 = 27;
pub const TERMINATOR_IN_PAYLOAD: u8 = 28;

/// Human-readable name for a status code, for diagnostics.
pub fn name(code: u8) -> &'static str {
    match code {
        STATUS_OK => "ok",
        DISCONNECTED => "disconnected",
        TIMEOUT => "timeout",
        CANCELLED => "cancelled",
        ERROR_MALFORMED_MESSAGE => "malformed message",
        ERROR_CONVERSION => "conversion error",
        ERROR_MSGBUF_OVERFLOW => "message buffer overflow",
        ERROR_PARTS_OVERFLOW => "too many message parts",
        PROTOCOL_ERROR => "protocol error",
        PROTOCOL_NOT_SUPPORTED => "protocol not supported",
        ENCRYPTION_NOT_SUPPORTED => "encryption not supported",
        AUTH_NOT_SUPPORTED => "authentication not supported",
        AUTHENTICATION_EXPECTED => "authentication expected",
        AUTHENTICATION_FAILED => "authentication failed",
        DEVICE_ERROR => "device error",
        TOO_MANY_PORTS => "too many ports",
        PORTTYPE_UNKNOWN => "port type unknown",
        PORT_UNKNOWN => "port unknown",
        WRONG_PORT_TYPE => "wrong port type",
        TOO_MANY_BINDINGS => "too many bindings",
        NO_BINDING => "no binding",
        CHANNEL_INVALID => "channel invalid",
        POSITION_INVALID => "position invalid",
        NETWORK_ERROR => "network error",
        TERMINATOR_IN_PAYLOAD => "terminator in payload",
        _ => "unknown",
    }
}

/// Status code for a port error, as reported in `Err` messages.
pub fn for_port_error(error: &PortError) -> u8 {
    match error.kind {
        PortErrorKind::PositionOutOfRange => POSITION_INVALID,
        PortErrorKind::WrongPortType => WRONG_PORT_TYPE,
        PortErrorKind::InvalidChannel => CHANNEL_INVALID,
        PortErrorKind::TooManyItems => TOO_MANY_PORTS,
        _ => DEVICE_ERROR,
    }
}

/// Status code for any protocol-layer error.
pub fn for_protocol_error(error: &ProtocolError) -> u8 {
    match error {
        ProtocolError::Port(err) => for_port_error(err),
        ProtocolError::Frame(err) => match err {
            opdi_frame::FrameError::TerminatorInPayload => TERMINATOR_IN_PAYLOAD,
            opdi_frame::FrameError::BufferOverflow { .. } => ERROR_MSGBUF_OVERFLOW,
            opdi_frame::FrameError::ChannelInvalid(_) => CHANNEL_INVALID,
            opdi_frame::FrameError::Timeout(_) => TIMEOUT,
            _ => ERROR_MALFORMED_MESSAGE,
        },
        ProtocolError::Protocol(_) => PROTOCOL_ERROR,
        ProtocolError::TooManyParts { .. } => ERROR_PARTS_OVERFLOW,
        ProtocolError::Timeout(_) => TIMEOUT,
        ProtocolError::Disconnected(_) => DISCONNECTED,
        ProtocolError::AuthenticationFailed(_) => AUTHENTICATION_FAILED,
        ProtocolError::Transport(_) => NETWORK_ERROR,
        ProtocolError::Device { code, .. } => *code,
        _ => DEVICE_ERROR,
    }
}
