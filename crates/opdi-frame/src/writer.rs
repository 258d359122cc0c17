use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use opdi_transport::DeviceStream;

use crate::codec::{encode_message, Message, MessageConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete messages to any `Write` stream.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    config: MessageConfig,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new message writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, MessageConfig::default())
    }

    /// Create a new message writer with explicit configuration.
    pub fn with_config(inner: T, config: MessageConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send a complete message (blocking).
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        self.buf.clear();
        encode_message(message, &mut self.buf, self.config.max_message_size)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Convenience: build and send a message on a channel.
    pub fn send(&mut self, channel: u16, payload: &str) -> Result<()> {
        self.write_message(&Message::new(channel, payload))
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &MessageConfig {
        &self.config
    }
}

impl MessageWriter<DeviceStream> {
    /// Create a message writer for a [`DeviceStream`].
    pub fn for_stream(inner: DeviceStream, config: MessageConfig) -> Self {
        Self::with_config(inner, config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_message;
    use crate::reader::MessageReader;

    #[test]
    fn write_single_message() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(16, "gDC").unwrap();

        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let decoded = decode_message(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(decoded.channel, 16);
        assert_eq!(decoded.payload, "gDC");
    }

    #[test]
    fn terminator_in_payload_rejected_before_writing() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.send(1, "a\nb").unwrap_err();
        assert!(matches!(err, FrameError::TerminatorInPayload));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn oversized_message_rejected() {
        let config = MessageConfig {
            max_message_size: 16,
            ..MessageConfig::default()
        };
        let mut writer = MessageWriter::with_config(Cursor::new(Vec::<u8>::new()), config);
        let err = writer.send(1, &"x".repeat(64)).unwrap_err();
        assert!(matches!(err, FrameError::BufferOverflow { .. }));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        struct ZeroWriter;
        impl Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = MessageWriter::new(ZeroWriter);
        let err = writer.send(1, "x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_write_retries() {
        struct InterruptedOnce {
            interrupted: bool,
            data: Vec<u8>,
        }
        impl Write for InterruptedOnce {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = MessageWriter::new(InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        });
        writer.send(5, "retry").unwrap();
        assert!(!writer.into_inner().data.is_empty());
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = MessageWriter::new(left);
        let mut reader = MessageReader::new(right);

        writer.send(0, "Ref:door:window").unwrap();
        let message = reader.read_message().unwrap();

        assert_eq!(message.channel, 0);
        assert_eq!(message.payload, "Ref:door:window");
    }
}
