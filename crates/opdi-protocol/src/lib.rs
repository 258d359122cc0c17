//! OPDI master/slave protocol implementation.
//!
//! The protocol multiplexes colon-delimited messages (see `opdi-frame`) over
//! numbered channels: channel 0 carries fire-and-forget control messages
//! (disconnect, reconfigure, debug, refresh, error), higher channels carry
//! synchronous request/response exchanges against the typed port model of
//! `opdi-port`.
//!
//! The slave side is a single-threaded cooperative loop ([`Slave::run`]); the
//! master side is a thread-per-concern session ([`Device`]) with a
//! [`MasterProtocol`] driving synchronous exchanges.

pub mod addr;
pub mod caps;
pub mod codes;
pub mod control;
pub mod device;
pub mod error;
pub mod handshake;
pub mod master;
pub mod slave;
pub mod tokens;

pub use addr::{DeviceAddress, DEFAULT_PORT, TCP_SCHEME};
pub use caps::DeviceCapabilities;
pub use control::ControlMessage;
pub use device::{
    CredentialsCallback, Device, DeviceConfig, DeviceListener, DeviceStatus, NullListener,
};
pub use error::{ProtocolError, Result};
pub use handshake::{
    handshake_master, handshake_slave, MasterHandshake, MasterHandshakeConfig, SlaveHandshake,
    SlaveIdentity, AUTHENTICATION_TIMEOUT, BASIC_PROTOCOL_MAGIC, DEFAULT_TIMEOUT,
    FLAG_AUTHENTICATION_REQUIRED,
};
pub use master::{AnalogState, MasterProtocol, MessageChannel, PingRunner, PING_INTERVAL};
pub use slave::{
    send_debug, send_disconnect, send_reconfigure, send_refresh, DisconnectReason, Slave,
};
