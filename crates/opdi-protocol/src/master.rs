//! Master-side protocol implementation.
//!
//! A [`MasterProtocol`] drives synchronous request/response exchanges against
//! a connected slave: it allocates a fresh channel per request, sends the
//! command, and blocks (with a bounded timeout) for exactly one reply on the
//! same channel. Set operations always await the authoritative state reply
//! and validate the echoed port ID — a mismatch is a protocol error, not a
//! retryable condition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use opdi_frame::{ChannelAllocator, Message, CONTROL};
use opdi_port::{AnalogMode, AnalogReference, DigitalLine, DigitalMode, PortDescriptor};
use tracing::{debug, warn};

use crate::caps::{parse_port_id_list, DeviceCapabilities};
use crate::control;
use crate::error::{ProtocolError, Result};
use crate::handshake::{BASIC_PROTOCOL_MAGIC, DEFAULT_TIMEOUT};
use crate::tokens;

/// Interval between keepalive pings on the control channel.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// The sending/receiving surface a protocol runs on. Implemented by the
/// device session; tests provide scripted stand-ins.
pub trait MessageChannel: Send + Sync {
    /// Send one message to the slave.
    fn send_message(&self, message: &Message) -> Result<()>;

    /// Wait for the reply on `channel`, removing it from the pending set.
    fn expect(&self, channel: u16, timeout: Duration) -> Result<Message>;

    fn is_connected(&self) -> bool;

    /// Time since the last outgoing message; the ping thread keeps this
    /// below the ping interval.
    fn last_send_elapsed(&self) -> Duration;
}

/// Create the protocol implementation for a negotiated magic.
///
/// Only the basic protocol is known; unknown magics yield `None`.
pub fn create_protocol(
    magic: &str,
    channel: Arc<dyn MessageChannel>,
) -> Option<Arc<MasterProtocol>> {
    (magic == BASIC_PROTOCOL_MAGIC).then(|| Arc::new(MasterProtocol::new(channel)))
}

/// Decoded analog port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogState {
    pub mode: AnalogMode,
    pub reference: AnalogReference,
    pub resolution: u8,
    pub value: i32,
}

/// The basic ("BP") protocol, master side.
pub struct MasterProtocol {
    channel: Arc<dyn MessageChannel>,
    allocator: Mutex<ChannelAllocator>,
    caps: Mutex<Option<Arc<DeviceCapabilities>>>,
    timeout: Duration,
}

impl MasterProtocol {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self::with_timeout(channel, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(channel: Arc<dyn MessageChannel>, timeout: Duration) -> Self {
        Self {
            channel,
            allocator: Mutex::new(ChannelAllocator::new()),
            caps: Mutex::new(None),
            timeout,
        }
    }

    pub fn magic(&self) -> &'static str {
        BASIC_PROTOCOL_MAGIC
    }

    fn next_channel(&self) -> u16 {
        self.allocator.lock().expect("allocator poisoned").next()
    }

    fn request_on(&self, channel: u16, payload: String) -> Result<Message> {
        self.channel.send_message(&Message::new(channel, payload))?;
        self.channel.expect(channel, self.timeout)
    }

    fn request(&self, payload: String) -> Result<Message> {
        self.request_on(self.next_channel(), payload)
    }

    /// Query the device capabilities, fetching port info for every advertised
    /// port. Idempotent after the first successful call — the result is
    /// cached until [`invalidate_capabilities`](Self::invalidate_capabilities).
    pub fn get_device_capabilities(&self) -> Result<Arc<DeviceCapabilities>> {
        if let Some(caps) = self.caps.lock().expect("caps poisoned").as_ref() {
            return Ok(Arc::clone(caps));
        }

        let channel = self.next_channel();
        let reply = self.request_on(channel, tokens::GET_DEVICE_CAPS.to_string())?;
        let ids = parse_port_id_list(&reply.payload)?;

        let mut ports = Vec::with_capacity(ids.len());
        for id in &ids {
            // unsupported port types come back as None and are skipped
            if let Some(descriptor) = self.get_port_info_on(channel, id)? {
                ports.push(descriptor);
            } else {
                warn!(port = %id, "slave advertises a port type we do not support");
            }
        }

        let caps = Arc::new(DeviceCapabilities::new(ports));
        *self.caps.lock().expect("caps poisoned") = Some(Arc::clone(&caps));
        debug!(ports = caps.len(), "device capabilities cached");
        Ok(caps)
    }

    /// Drop the cached capabilities (Reconfigure received).
    pub fn invalidate_capabilities(&self) {
        *self.caps.lock().expect("caps poisoned") = None;
    }

    /// Fetch the descriptor of one port. Unknown port magics yield `None`
    /// ("port type unsupported"), not an error.
    pub fn get_port_info(&self, id: &str) -> Result<Option<PortDescriptor>> {
        let channel = self.next_channel();
        self.get_port_info_on(channel, id)
    }

    fn get_port_info_on(&self, channel: u16, id: &str) -> Result<Option<PortDescriptor>> {
        let reply = self.request_on(channel, format!("{}:{id}", tokens::GET_PORT_INFO))?;
        let parts: Vec<&str> = reply.payload.split(':').collect();
        let mut descriptor = match PortDescriptor::parse(&parts)? {
            Some(descriptor) => descriptor,
            None => return Ok(None),
        };

        // select descriptors only carry the count; fetch the labels
        if let PortDescriptor::Select { count, labels, .. } = &mut descriptor {
            for position in 0..*count {
                labels.push(self.get_select_label(id, position)?);
            }
        }
        Ok(Some(descriptor))
    }

    // digital ports

    pub fn get_digital_state(&self, id: &str) -> Result<(DigitalMode, DigitalLine)> {
        let reply = self.request(format!("{}:{id}", tokens::GET_DIGITAL_STATE))?;
        decode_digital_state(&reply, id)
    }

    pub fn set_digital_mode(&self, id: &str, mode: DigitalMode) -> Result<(DigitalMode, DigitalLine)> {
        let reply = self.request(format!(
            "{}:{id}:{}",
            tokens::SET_DIGITAL_MODE,
            mode.as_wire()
        ))?;
        decode_digital_state(&reply, id)
    }

    pub fn set_digital_line(&self, id: &str, line: DigitalLine) -> Result<(DigitalMode, DigitalLine)> {
        let reply = self.request(format!(
            "{}:{id}:{}",
            tokens::SET_DIGITAL_LINE,
            line.as_wire()
        ))?;
        decode_digital_state(&reply, id)
    }

    // analog ports

    pub fn get_analog_state(&self, id: &str) -> Result<AnalogState> {
        let reply = self.request(format!("{}:{id}", tokens::GET_ANALOG_STATE))?;
        decode_analog_state(&reply, id)
    }

    pub fn set_analog_value(&self, id: &str, value: i32) -> Result<AnalogState> {
        let reply = self.request(format!("{}:{id}:{value}", tokens::SET_ANALOG_VALUE))?;
        decode_analog_state(&reply, id)
    }

    pub fn set_analog_mode(&self, id: &str, mode: AnalogMode) -> Result<AnalogState> {
        let reply = self.request(format!(
            "{}:{id}:{}",
            tokens::SET_ANALOG_MODE,
            mode.as_wire()
        ))?;
        decode_analog_state(&reply, id)
    }

    pub fn set_analog_resolution(&self, id: &str, resolution: u8) -> Result<AnalogState> {
        let reply = self.request(format!(
            "{}:{id}:{resolution}",
            tokens::SET_ANALOG_RESOLUTION
        ))?;
        decode_analog_state(&reply, id)
    }

    pub fn set_analog_reference(&self, id: &str, reference: AnalogReference) -> Result<AnalogState> {
        let reply = self.request(format!(
            "{}:{id}:{}",
            tokens::SET_ANALOG_REFERENCE,
            reference.as_wire()
        ))?;
        decode_analog_state(&reply, id)
    }

    // select ports

    pub fn get_select_position(&self, id: &str) -> Result<u16> {
        let reply = self.request(format!("{}:{id}", tokens::GET_SELECT_STATE))?;
        decode_select_state(&reply, id)
    }

    pub fn set_select_position(&self, id: &str, position: u16) -> Result<u16> {
        let reply = self.request(format!("{}:{id}:{position}", tokens::SET_SELECT_POSITION))?;
        decode_select_state(&reply, id)
    }

    pub fn get_select_label(&self, id: &str, position: u16) -> Result<String> {
        let reply = self.request(format!("{}:{id}:{position}", tokens::GET_SELECT_LABEL))?;
        let parts: Vec<&str> = reply.payload.split(':').collect();
        if parts.len() < 4 {
            return Err(ProtocolError::Protocol(format!(
                "select label reply has {} parts, expected 4",
                parts.len()
            )));
        }
        check_reply(&parts, tokens::SELECT_LABEL, id)?;
        // labels may contain separators
        Ok(parts[3..].join(":"))
    }

    // dial ports

    pub fn get_dial_position(&self, id: &str) -> Result<i64> {
        let reply = self.request(format!("{}:{id}", tokens::GET_DIAL_STATE))?;
        decode_dial_state(&reply, id)
    }

    pub fn set_dial_position(&self, id: &str, position: i64) -> Result<i64> {
        let reply = self.request(format!("{}:{id}:{position}", tokens::SET_DIAL_POSITION))?;
        decode_dial_state(&reply, id)
    }

    // control channel

    /// Send a keepalive ping. Any unrecognised control payload serves; the
    /// slave only uses it to feed its idle bookkeeping.
    pub fn ping(&self) -> Result<()> {
        self.channel
            .send_message(&Message::new(CONTROL, control::PING))
    }

    /// Send the disconnect message. No reply is expected and send failures
    /// are ignored (the link may already be gone).
    pub fn send_disconnect(&self) {
        let _ = self
            .channel
            .send_message(&Message::new(CONTROL, control::DISCONNECT));
    }
}

fn check_reply(parts: &[&str], magic: &str, id: &str) -> Result<()> {
    if parts[0] != magic {
        return Err(ProtocolError::Protocol(format!(
            "unexpected reply magic {:?}, expected {magic:?}",
            parts[0]
        )));
    }
    if parts[1] != id {
        return Err(ProtocolError::Protocol(format!(
            "reply for wrong port ID {:?}, expected {id:?}",
            parts[1]
        )));
    }
    Ok(())
}

fn decode_digital_state(reply: &Message, id: &str) -> Result<(DigitalMode, DigitalLine)> {
    let parts: Vec<&str> = reply.payload.split(':').collect();
    if parts.len() != 4 {
        return Err(ProtocolError::Protocol(format!(
            "digital state reply has {} parts, expected 4",
            parts.len()
        )));
    }
    check_reply(&parts, tokens::DIGITAL_STATE, id)?;
    let mode = DigitalMode::from_wire(parts[2]).ok_or_else(|| {
        ProtocolError::Protocol(format!("bad digital mode {:?}", parts[2]))
    })?;
    let line = DigitalLine::from_wire(parts[3]).ok_or_else(|| {
        ProtocolError::Protocol(format!("bad digital line {:?}", parts[3]))
    })?;
    Ok((mode, line))
}

fn decode_analog_state(reply: &Message, id: &str) -> Result<AnalogState> {
    let parts: Vec<&str> = reply.payload.split(':').collect();
    if parts.len() != 6 {
        return Err(ProtocolError::Protocol(format!(
            "analog state reply has {} parts, expected 6",
            parts.len()
        )));
    }
    check_reply(&parts, tokens::ANALOG_STATE, id)?;
    let mode = AnalogMode::from_wire(parts[2])
        .ok_or_else(|| ProtocolError::Protocol(format!("bad analog mode {:?}", parts[2])))?;
    let reference = AnalogReference::from_wire(parts[3])
        .ok_or_else(|| ProtocolError::Protocol(format!("bad analog reference {:?}", parts[3])))?;
    let resolution: u8 = parts[4]
        .parse()
        .map_err(|_| ProtocolError::Protocol(format!("bad analog resolution {:?}", parts[4])))?;
    let value: i32 = parts[5]
        .parse()
        .map_err(|_| ProtocolError::Protocol(format!("bad analog value {:?}", parts[5])))?;
    Ok(AnalogState {
        mode,
        reference,
        resolution,
        value,
    })
}

fn decode_select_state(reply: &Message, id: &str) -> Result<u16> {
    let parts: Vec<&str> = reply.payload.split(':').collect();
    if parts.len() != 3 {
        return Err(ProtocolError::Protocol(format!(
            "select state reply has {} parts, expected 3",
            parts.len()
        )));
    }
    check_reply(&parts, tokens::SELECT_STATE, id)?;
    parts[2]
        .parse()
        .map_err(|_| ProtocolError::Protocol(format!("bad select position {:?}", parts[2])))
}

fn decode_dial_state(reply: &Message, id: &str) -> Result<i64> {
    let parts: Vec<&str> = reply.payload.split(':').collect();
    if parts.len() != 3 {
        return Err(ProtocolError::Protocol(format!(
            "dial state reply has {} parts, expected 3",
            parts.len()
        )));
    }
    check_reply(&parts, tokens::DIAL_STATE, id)?;
    parts[2]
        .parse()
        .map_err(|_| ProtocolError::Protocol(format!("bad dial position {:?}", parts[2])))
}

/// Background keepalive: pings the slave whenever the link has been quiet
/// for a full interval. Terminates cooperatively via the stop flag and exits
/// silently on any I/O error (the link is already gone).
pub struct PingRunner {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PingRunner {
    pub fn start(channel: Arc<dyn MessageChannel>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("opdi-ping".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) && channel.is_connected() {
                    let quiet = channel.last_send_elapsed();
                    if quiet < interval {
                        thread::sleep((interval - quiet).min(Duration::from_millis(50)));
                        continue;
                    }
                    if channel
                        .send_message(&Message::new(CONTROL, control::PING))
                        .is_err()
                    {
                        return;
                    }
                }
            })
            .expect("failed to spawn ping thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for PingRunner {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
