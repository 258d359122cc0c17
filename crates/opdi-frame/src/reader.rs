use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use opdi_transport::DeviceStream;
use tracing::trace;

use crate::codec::{decode_message, Message, MessageConfig, TERMINATOR};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete, decoded
/// and checksum-verified messages.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: MessageConfig,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, MessageConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: T, config: MessageConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read the next message, giving up after `timeout` and running
    /// `housekeeping` whenever the underlying stream has nothing to offer.
    ///
    /// The stream must have a short read timeout set (see
    /// [`MessageConfig::poll_interval`]); each poll wakeup invokes the
    /// housekeeping callback. This is the single sanctioned suspension point
    /// of the single-threaded slave loop — housekeeping is where port work
    /// and unsolicited refreshes happen.
    pub fn read_message_timeout<F>(&mut self, timeout: Duration, mut housekeeping: F) -> Result<Message>
    where
        F: FnMut() -> std::io::Result<()>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    housekeeping().map_err(FrameError::Io)?;
                    if Instant::now() >= deadline {
                        return Err(FrameError::Timeout(timeout));
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Decode one message from the buffer if a full line is present.
    fn take_buffered(&mut self) -> Result<Option<Message>> {
        match self.buf.iter().position(|&b| b == TERMINATOR) {
            Some(pos) => {
                let line = self.buf.split_to(pos + 1);
                let message = decode_message(&line[..pos])?;
                trace!(channel = message.channel, bytes = pos, "message received");
                Ok(Some(message))
            }
            None => {
                if self.buf.len() > self.config.max_message_size {
                    return Err(FrameError::BufferOverflow {
                        size: self.buf.len(),
                        max: self.config.max_message_size,
                    });
                }
                Ok(None)
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

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &MessageConfig {
        &self.config
    }
}

impl MessageReader<DeviceStream> {
    /// Create a message reader for a [`DeviceStream`], applying the poll
    /// interval from the configuration as the stream read timeout.
    pub fn for_stream(inner: DeviceStream, config: MessageConfig) -> Result<Self> {
        inner
            .set_read_timeout(Some(config.poll_interval))
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn transport_to_frame_error(err: opdi_transport::TransportError) -> FrameError {
    match err {
        opdi_transport::TransportError::Io(io) | opdi_transport::TransportError::Accept(io) => {
            FrameError::Io(io)
        }
        opdi_transport::TransportError::Bind { source, .. }
        | opdi_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_message, DEFAULT_MAX_MESSAGE_SIZE};

    fn wire(messages: &[Message]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for m in messages {
            encode_message(m, &mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_message() {
        let bytes = wire(&[Message::new(1, "gDC")]);
        let mut reader = MessageReader::new(Cursor::new(bytes));
        let message = reader.read_message().unwrap();
        assert_eq!(message.channel, 1);
        assert_eq!(message.payload, "gDC");
    }

    #[test]
    fn read_multiple_messages() {
        let bytes = wire(&[
            Message::new(16, "gPI:door"),
            Message::new(0, "Dis"),
            Message::new(17, "gDS:door"),
        ]);
        let mut reader = MessageReader::new(Cursor::new(bytes));

        assert_eq!(reader.read_message().unwrap().payload, "gPI:door");
        assert_eq!(reader.read_message().unwrap().channel, 0);
        assert_eq!(reader.read_message().unwrap().payload, "gDS:door");
    }

    #[test]
    fn partial_read_handling() {
        let bytes = wire(&[Message::new(4, "Debug:slow link")]);
        let reader = ByteByByteReader { bytes, pos: 0 };
        let mut reader = MessageReader::new(reader);

        let message = reader.read_message().unwrap();
        assert_eq!(message.channel, 4);
        assert_eq!(message.payload, "Debug:slow link");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = MessageReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_message() {
        let mut bytes = wire(&[Message::new(2, "gDC")]);
        bytes.truncate(bytes.len() - 3); // lose checksum tail and terminator

        let mut reader = MessageReader::new(Cursor::new(bytes));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn corrupt_checksum_in_stream() {
        let mut bytes = wire(&[Message::new(2, "gDC")]);
        bytes[2] ^= 0x01; // flip a payload byte

        let mut reader = MessageReader::new(Cursor::new(bytes));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, FrameError::ChecksumInvalid { .. }));
    }

    #[test]
    fn unterminated_garbage_overflows() {
        let bytes = vec![b'x'; DEFAULT_MAX_MESSAGE_SIZE + 128];
        let mut reader = MessageReader::new(Cursor::new(bytes));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, FrameError::BufferOverflow { .. }));
    }

    #[test]
    fn timeout_runs_housekeeping_and_expires() {
        let mut reader = MessageReader::new(AlwaysWouldBlock);
        let mut ticks = 0usize;
        let err = reader
            .read_message_timeout(Duration::from_millis(30), || {
                ticks += 1;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
        assert!(ticks >= 1, "housekeeping never ran");
    }

    #[test]
    fn housekeeping_error_aborts_receive() {
        let mut reader = MessageReader::new(AlwaysWouldBlock);
        let err = reader
            .read_message_timeout(Duration::from_secs(5), || {
                Err(std::io::Error::other("work failed"))
            })
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn timeout_receives_message_that_arrives_late() {
        let bytes = wire(&[Message::new(9, "gDC")]);
        let reader = WouldBlockThenData {
            blocks_left: 3,
            bytes,
            pos: 0,
        };
        let mut reader = MessageReader::new(reader);
        let message = reader
            .read_message_timeout(Duration::from_secs(5), || Ok(()))
            .unwrap();
        assert_eq!(message.channel, 9);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct AlwaysWouldBlock;

    impl Read for AlwaysWouldBlock {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }
    }

    struct WouldBlockThenData {
        blocks_left: usize,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.blocks_left > 0 {
                self.blocks_left -= 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
