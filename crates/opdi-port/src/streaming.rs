use tracing::debug;

use crate::base::{flags, PortBase, PortDirCaps};
use crate::error::{PortError, PortErrorKind, Result};

/// Byte-oriented driver behind a streaming port.
///
/// Implementations wrap whatever produces or consumes the stream (a UART, a
/// text generator, a test double). All three operations are fallible; there
/// are no sentinel return values.
pub trait StreamingDriver: Send {
    /// Write bytes to the driver, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Number of bytes available to read. `hint` is the caller's interest
    /// cap; drivers may stop counting beyond it.
    fn available(&mut self, hint: usize) -> std::io::Result<usize>;

    /// Read one byte.
    fn read(&mut self) -> std::io::Result<u8>;
}

/// A bidirectional streaming port. Carries opaque byte data over a bound
/// channel instead of typed state.
pub struct StreamingPort {
    base: PortBase,
    driver_id: String,
    channel: u16,
    driver: Option<Box<dyn StreamingDriver>>,
}

impl StreamingPort {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        driver_id: impl Into<String>,
        port_flags: i32,
    ) -> Self {
        Self {
            base: PortBase::new(id, label, PortDirCaps::Bidirectional, port_flags),
            driver_id: driver_id.into(),
            channel: 0,
            driver: None,
        }
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    /// Attach the driver that handles this port's data.
    pub fn attach_driver(&mut self, driver: Box<dyn StreamingDriver>) {
        self.driver = Some(driver);
    }

    /// Whether the master may bind this port automatically on connect.
    pub fn autobind(&self) -> bool {
        self.base.has_flag(flags::STREAMING_AUTOBIND)
    }

    /// Bind the port to a channel. Channel 0 means unbound and is rejected.
    pub fn bind(&mut self, channel: u16) -> Result<()> {
        if channel == 0 {
            return Err(PortError::new(
                PortErrorKind::InvalidChannel,
                self.base.id(),
                "streaming ports cannot bind to the control channel",
            ));
        }
        self.channel = channel;
        debug!(port = self.base.id(), channel, "streaming port bound");
        Ok(())
    }

    pub fn unbind(&mut self) {
        debug!(port = self.base.id(), "streaming port unbound");
        self.channel = 0;
    }

    /// A streaming port is bound when a channel is set.
    pub fn is_bound(&self) -> bool {
        self.channel != 0
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    fn driver_mut(&mut self) -> std::io::Result<&mut Box<dyn StreamingDriver>> {
        self.driver
            .as_mut()
            .ok_or_else(|| std::io::Error::other("no driver attached"))
    }

    /// Write data to the driver.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.driver_mut()?.write(data)
    }

    /// Bytes available from the driver.
    pub fn available(&mut self, hint: usize) -> std::io::Result<usize> {
        self.driver_mut()?.available(hint)
    }

    /// Read one byte from the driver.
    pub fn read(&mut self) -> std::io::Result<u8> {
        self.driver_mut()?.read()
    }

    /// Deliver data that arrived on the bound channel.
    pub fn data_received(&mut self, data: &str) -> std::io::Result<()> {
        let driver = self.driver_mut()?;
        let mut remaining = data.as_bytes();
        while !remaining.is_empty() {
            let written = driver.write(remaining)?;
            if written == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "driver refused data",
                ));
            }
            remaining = &remaining[written..];
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamingPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPort")
            .field("id", &self.base.id())
            .field("driver_id", &self.driver_id)
            .field("channel", &self.channel)
            .field("has_driver", &self.driver.is_some())
            .finish()
    }
}
