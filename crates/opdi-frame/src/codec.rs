use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Separator between the channel, payload sub-fields, and checksum.
pub const SEPARATOR: u8 = b':';

/// Message terminator. Must never appear inside a payload.
pub const TERMINATOR: u8 = b'\n';

/// Default maximum size of one encoded message including the terminator.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// Maximum number of `:`-separated parts a payload may carry.
///
/// Bounds refresh messages and all dispatch tables.
pub const MAX_MESSAGE_PARTS: usize = 16;

/// A decoded wire message: a channel number and a text payload.
///
/// Constructed per send/receive and discarded after dispatch. The payload is
/// itself often `:`-delimited sub-fields, which are the business of the
/// protocol layer, not the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The channel this message belongs to. 0 is the control channel.
    pub channel: u16,
    /// The message payload, without channel or checksum.
    pub payload: String,
}

impl Message {
    /// Create a new message.
    pub fn new(channel: u16, payload: impl Into<String>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.payload)
    }
}

/// 16-bit truncated sum of unsigned byte values.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(b as u32)) as u16
}

/// Encode a message into the wire format.
///
/// Produces `<channel>:<payload>:<4-hex-checksum>\n`. Fails with
/// [`FrameError::TerminatorInPayload`] if the payload contains the terminator
/// byte and with [`FrameError::BufferOverflow`] if the encoded length exceeds
/// `max_size`.
pub fn encode_message(message: &Message, dst: &mut BytesMut, max_size: usize) -> Result<()> {
    let content = format!("{}:{}", message.channel, message.payload);
    if content.as_bytes().contains(&TERMINATOR) {
        return Err(FrameError::TerminatorInPayload);
    }

    let check = checksum(content.as_bytes());
    // channel + payload + ":" + 4 hex digits + "\n"
    let encoded_len = content.len() + 6;
    if encoded_len > max_size {
        return Err(FrameError::BufferOverflow {
            size: encoded_len,
            max: max_size,
        });
    }

    dst.reserve(encoded_len);
    dst.put_slice(content.as_bytes());
    dst.put_u8(SEPARATOR);
    dst.put_slice(format!("{check:04x}").as_bytes());
    dst.put_u8(TERMINATOR);
    Ok(())
}

/// Decode a message from one serialized line (without the terminator).
///
/// Splits on `:` and requires at least three parts. The last part is the hex
/// checksum, recomputed over all bytes preceding the final `:`; a mismatch
/// fails with [`FrameError::ChecksumInvalid`] carrying both values. The first
/// part is the decimal channel. Everything in between, rejoined with `:`,
/// forms the payload.
pub fn decode_message(line: &[u8]) -> Result<Message> {
    let last_sep = line
        .iter()
        .rposition(|&b| b == SEPARATOR)
        .ok_or(FrameError::Malformed("message part count too low"))?;
    let first_sep = line
        .iter()
        .position(|&b| b == SEPARATOR)
        .expect("rposition found a separator");
    if first_sep == last_sep {
        // channel and checksum alone don't make a message
        return Err(FrameError::Malformed("message part count too low"));
    }

    let checksum_part = std::str::from_utf8(&line[last_sep + 1..])
        .map_err(|_| FrameError::Malformed("checksum is not valid UTF-8"))?;
    let expected = u16::from_str_radix(checksum_part, 16)
        .map_err(|_| FrameError::Malformed("checksum is not a hex number"))?;

    let computed = checksum(&line[..last_sep]);
    if computed != expected {
        return Err(FrameError::ChecksumInvalid { computed, expected });
    }

    let channel_part = std::str::from_utf8(&line[..first_sep])
        .map_err(|_| FrameError::ChannelInvalid(String::from("<non-utf8>")))?;
    let channel = channel_part
        .parse::<u16>()
        .map_err(|_| FrameError::ChannelInvalid(channel_part.to_string()))?;

    let payload = std::str::from_utf8(&line[first_sep + 1..last_sep])
        .map_err(|_| FrameError::Malformed("payload is not valid UTF-8"))?;

    Ok(Message {
        channel,
        payload: payload.to_string(),
    })
}

/// Configuration for the message codec.
#[derive(Debug, Clone)]
pub struct MessageConfig {
    /// Maximum size of one encoded message. Default: 4 KiB.
    pub max_message_size: usize,
    /// Interval at which a blocked receive wakes up to run housekeeping.
    ///
    /// Applied as the stream read timeout by the stream-aware constructors.
    pub poll_interval: std::time::Duration,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            poll_interval: std::time::Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec(message: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_message(message, &mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        buf.to_vec()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let message = Message::new(3, "gDC");
        let wire = encode_to_vec(&message);

        assert_eq!(wire.last(), Some(&TERMINATOR));
        let decoded = decode_message(&wire[..wire.len() - 1]).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn known_vector_digital_state() {
        // Deterministic checksum for channel 5, payload "DS:DP1:3:1".
        let message = Message::new(5, "DS:DP1:3:1");
        let wire = encode_to_vec(&message);

        assert_eq!(wire, b"5:DS:DP1:3:1:02dd\n");

        let decoded = decode_message(&wire[..wire.len() - 1]).unwrap();
        assert_eq!(decoded.channel, 5);
        assert_eq!(decoded.payload, "DS:DP1:3:1");
    }

    #[test]
    fn payload_with_separators_survives() {
        let message = Message::new(42, "Err:21:port not found");
        let wire = encode_to_vec(&message);
        let decoded = decode_message(&wire[..wire.len() - 1]).unwrap();
        assert_eq!(decoded.payload, "Err:21:port not found");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let message = Message::new(0, "");
        let wire = encode_to_vec(&message);
        let decoded = decode_message(&wire[..wire.len() - 1]).unwrap();
        assert_eq!(decoded.channel, 0);
        assert_eq!(decoded.payload, "");
    }

    #[test]
    fn terminator_in_payload_rejected() {
        let message = Message::new(1, "bad\npayload");
        let mut buf = BytesMut::new();
        let err = encode_message(&message, &mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, FrameError::TerminatorInPayload));
    }

    #[test]
    fn oversized_message_rejected() {
        let message = Message::new(1, "x".repeat(64));
        let mut buf = BytesMut::new();
        let err = encode_message(&message, &mut buf, 32).unwrap_err();
        assert!(matches!(err, FrameError::BufferOverflow { size: _, max: 32 }));
    }

    #[test]
    fn checksum_flip_detected() {
        // Flipping any byte of channel or payload must fail the checksum.
        let message = Message::new(5, "DS:DP1:3:1");
        let wire = encode_to_vec(&message);
        let body_len = wire.len() - 6; // strip ":xxxx\n"

        for i in 0..body_len {
            let mut corrupted = wire.clone();
            corrupted[i] ^= 0x01;
            // skip flips that turn a byte into a separator or terminator;
            // those change the message structure instead of its content
            if corrupted[i] == SEPARATOR || corrupted[i] == TERMINATOR {
                continue;
            }
            let result = decode_message(&corrupted[..corrupted.len() - 1]);
            assert!(
                matches!(result, Err(FrameError::ChecksumInvalid { .. })),
                "flip at offset {i} not detected"
            );
        }
    }

    #[test]
    fn checksum_error_reports_both_values() {
        let err = decode_message(b"1:gDC:ffff").unwrap_err();
        match err {
            FrameError::ChecksumInvalid { computed, expected } => {
                assert_eq!(expected, 0xffff);
                assert_eq!(computed, checksum(b"1:gDC"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn too_few_parts_rejected() {
        assert!(matches!(
            decode_message(b"noseparators"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            decode_message(b"1:02dd"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn bad_checksum_digits_rejected() {
        assert!(matches!(
            decode_message(b"1:gDC:zzzz"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn non_numeric_channel_rejected() {
        // "abc:gDC" with a correct checksum must fail on the channel, not the
        // checksum.
        let check = checksum(b"abc:gDC");
        let line = format!("abc:gDC:{check:04x}");
        let err = decode_message(line.as_bytes()).unwrap_err();
        assert!(matches!(err, FrameError::ChannelInvalid(c) if c == "abc"));
    }

    #[test]
    fn checksum_truncates_to_16_bits() {
        let long = "z".repeat(600);
        let sum: u32 = long.bytes().map(|b| b as u32).sum();
        assert!(sum > u16::MAX as u32);
        assert_eq!(checksum(long.as_bytes()), (sum & 0xffff) as u16);
    }
}
