//! Blocking transport layer for OPDI devices.
//!
//! OPDI devices speak over stream transports (TCP in this workspace; serial
//! remains an external concern). This crate provides the connected stream
//! type and a TCP endpoint for the listening (slave) and connecting (master)
//! sides. Framing lives one layer up in `opdi-frame`.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::TcpEndpoint;
pub use traits::DeviceStream;
