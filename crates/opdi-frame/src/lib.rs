//! Message framing with channel multiplexing for OPDI.
//!
//! This is the wire core shared by master and slave. Every message is a
//! single text line:
//!
//! ```text
//! <channel>:<payload>:<checksum>\n
//! ```
//!
//! where the checksum is the 16-bit truncated sum of the unsigned byte values
//! of everything before the last `:`, formatted as four lowercase hex digits.
//! Channel 0 carries control messages; channels from
//! [`CHANNEL_LOWEST_SYNCHRONOUS`] up are synchronous request/response lanes
//! handed out by the [`ChannelAllocator`].

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::{
    ChannelAllocator, CHANNEL_HIGHEST_STREAMING, CHANNEL_LOWEST_STREAMING,
    CHANNEL_LOWEST_SYNCHRONOUS, CHANNEL_ROLLOVER, CONTROL,
};
pub use codec::{
    checksum, decode_message, encode_message, Message, MessageConfig, DEFAULT_MAX_MESSAGE_SIZE,
    MAX_MESSAGE_PARTS, SEPARATOR, TERMINATOR,
};
pub use error::{FrameError, Result};
pub use reader::MessageReader;
pub use writer::MessageWriter;
