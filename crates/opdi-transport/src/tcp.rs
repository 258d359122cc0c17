use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DeviceStream;

/// Default TCP port for OPDI devices.
pub const DEFAULT_PORT: u16 = 13110;

/// TCP transport endpoint.
///
/// Provides bind/accept for the slave side and connect for the master side.
pub struct TcpEndpoint {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind and listen on the given address.
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let display = addr.to_string();
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: display,
            source: e,
        })?;
        let addr = listener.local_addr()?;
        info!(%addr, "listening for device connections");
        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<DeviceStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        // Messages are small and latency-sensitive.
        stream.set_nodelay(true).map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        Ok(DeviceStream::from_tcp(stream))
    }

    /// Connect to a listening device (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<DeviceStream> {
        let addr_str = addr.to_string();
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::Connect {
            addr: addr_str.clone(),
            source: e,
        })?;
        stream.set_nodelay(true).map_err(|e| TransportError::Connect {
            addr: addr_str.clone(),
            source: e,
        })?;
        debug!(addr = %addr_str, "connected to device");
        Ok(DeviceStream::from_tcp(stream))
    }

    /// The local address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn bind_accept_connect_roundtrip() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr();

        let handle = std::thread::spawn(move || {
            let mut client = TcpEndpoint::connect(addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = endpoint.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn connect_to_unbound_port_fails() {
        // Bind then drop to get a port that is very likely closed.
        let addr = {
            let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
            endpoint.local_addr()
        };
        let result = TcpEndpoint::connect(addr);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn try_clone_shares_connection() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr();

        let handle = std::thread::spawn(move || {
            let client = TcpEndpoint::connect(addr).unwrap();
            let mut clone = client.try_clone().unwrap();
            clone.write_all(b"via-clone").unwrap();
        });

        let mut server = endpoint.accept().unwrap();
        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"via-clone");

        handle.join().unwrap();
    }

    #[test]
    fn read_timeout_applies() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr();

        let handle = std::thread::spawn(move || {
            let _client = TcpEndpoint::connect(addr).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(200));
        });

        let mut server = endpoint.accept().unwrap();
        server
            .set_read_timeout(Some(std::time::Duration::from_millis(10)))
            .unwrap();
        let mut buf = [0u8; 1];
        let err = server.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));

        handle.join().unwrap();
    }

    #[test]
    fn shutdown_unblocks_reader() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr();

        let client = TcpEndpoint::connect(addr).unwrap();
        let mut server = endpoint.accept().unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            server.read(&mut buf)
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        client.shutdown().unwrap();

        // EOF (Ok(0)) is the expected way out of the blocked read.
        let result = reader.join().unwrap();
        assert_eq!(result.unwrap_or(0), 0);
    }
}
