//! Channel numbering and the synchronous channel allocator.
//!
//! Channel 0 is the control channel (disconnect, reconfigure, debug, refresh,
//! error — fire-and-forget). Channels 1..=15 are reserved for streaming port
//! bindings. Channels from 16 up are synchronous request/response lanes.

/// Control messages travel on channel 0. No reply is expected.
pub const CONTROL: u16 = 0;

/// Lowest channel a streaming port may be bound to.
pub const CHANNEL_LOWEST_STREAMING: u16 = 1;

/// Highest channel a streaming port may be bound to.
pub const CHANNEL_HIGHEST_STREAMING: u16 = 15;

/// First channel handed out for synchronous request/response exchanges.
pub const CHANNEL_LOWEST_SYNCHRONOUS: u16 = 16;

/// Exclusive upper bound for channel numbers; the allocator wraps to 1 here.
pub const CHANNEL_ROLLOVER: u16 = 16384;

/// Returns a human-readable name for a channel number.
pub fn channel_name(channel: u16) -> &'static str {
    match channel {
        CONTROL => "CONTROL",
        CHANNEL_LOWEST_STREAMING..=CHANNEL_HIGHEST_STREAMING => "STREAMING",
        _ => "SYNC",
    }
}

/// Hands out monotonically increasing synchronous channel numbers for
/// request/response pairing.
///
/// Not reentrant-safe; callers allocating from multiple threads must guard
/// the allocator externally. The caller is also responsible for retiring a
/// channel once its response has arrived or timed out — no two in-flight
/// exchanges may share a channel.
#[derive(Debug)]
pub struct ChannelAllocator {
    current: u16,
}

impl ChannelAllocator {
    /// Create an allocator whose first handout is
    /// [`CHANNEL_LOWEST_SYNCHRONOUS`].
    pub fn new() -> Self {
        Self {
            current: CHANNEL_LOWEST_SYNCHRONOUS - 1,
        }
    }

    /// Return the next synchronous channel number.
    ///
    /// Wraps to 1 when reaching [`CHANNEL_ROLLOVER`]; never returns 0.
    pub fn next(&mut self) -> u16 {
        let mut channel = self.current + 1;
        if channel >= CHANNEL_ROLLOVER {
            channel = 1;
        }
        self.current = channel;
        channel
    }

    /// Reset to the initial state (new protocol run).
    pub fn reset(&mut self) {
        self.current = CHANNEL_LOWEST_SYNCHRONOUS - 1;
    }
}

impl Default for ChannelAllocator {
    fn default() -> Self {
        Self::new()
    }
}
