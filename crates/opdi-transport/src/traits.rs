use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};

use crate::error::Result;

/// A connected device stream — implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Currently wraps a TCP stream; a serial variant can be added without
/// changing the framing layer above.
pub struct DeviceStream {
    inner: DeviceStreamInner,
}

enum DeviceStreamInner {
    Tcp(std::net::TcpStream),
}

impl Read for DeviceStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for DeviceStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            DeviceStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl DeviceStream {
    /// Create a DeviceStream from a TCP stream.
    pub(crate) fn from_tcp(stream: std::net::TcpStream) -> Self {
        Self {
            inner: DeviceStreamInner::Tcp(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    ///
    /// The message reader relies on this for its poll-with-housekeeping
    /// receive loop.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// Needed because the reader thread and the sender side of a session own
    /// independent handles to the same connection.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_tcp(cloned))
            }
        }
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => stream.peer_addr().map_err(Into::into),
        }
    }

    /// Shut down both directions of the stream.
    ///
    /// An aborted connect has no way to cancel a blocking read other than
    /// closing the transport underneath it.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            DeviceStreamInner::Tcp(stream) => f
                .debug_struct("DeviceStream")
                .field("type", &"tcp")
                .field("peer", &stream.peer_addr().ok())
                .finish(),
        }
    }
}
