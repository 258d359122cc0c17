//! Slave-side protocol session: port registry, message loop, dispatch.
//!
//! The slave runs a single-threaded cooperative loop: it blocks in the
//! message receive primitive, which polls the transport and invokes the
//! housekeeping callback while waiting. Housekeeping runs the caller's work
//! function over the ports and emits unsolicited refresh messages for ports
//! whose state changed under Auto refresh mode. Nothing else may block.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use opdi_frame::{MessageReader, MessageWriter, CONTROL, MAX_MESSAGE_PARTS};
use opdi_port::{
    AnalogMode, AnalogPort, AnalogReference, ChangeSource, DialPort, DigitalLine, DigitalMode,
    DigitalPort, Port, PortError, PortErrorKind, PortGroup, PortGroups, SelectPort,
};
use tracing::{debug, info, warn};

use crate::codes;
use crate::control::{self, ControlMessage};
use crate::error::{ProtocolError, Result};
use crate::handshake::{
    handshake_slave, SlaveIdentity, DEFAULT_TIMEOUT, FLAG_AUTHENTICATION_REQUIRED,
};
use crate::tokens;

/// Why a slave session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The master sent a Disconnect message.
    MasterDisconnect,
    /// No activity within the configured idle timeout.
    IdleTimeout,
    /// A local shutdown request.
    Shutdown,
}

/// A device exposing ports to a connecting master.
///
/// Ports and groups are registered during setup, before the message loop
/// starts; registration is not guarded for concurrent use.
pub struct Slave {
    identity: SlaveIdentity,
    idle_timeout: Duration,
    message_timeout: Duration,
    ports: Vec<Port>,
    groups: PortGroups,
    last_activity: Instant,
    prepared: bool,
    shutdown: Arc<AtomicBool>,
}

impl Slave {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            identity: SlaveIdentity::new(name),
            idle_timeout: Duration::ZERO,
            message_timeout: DEFAULT_TIMEOUT,
            ports: Vec::new(),
            groups: PortGroups::new(),
            last_activity: Instant::now(),
            prepared: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.identity.encoding = encoding.into();
    }

    /// Require the master to authenticate with these credentials.
    pub fn require_authentication(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.identity.flags |= FLAG_AUTHENTICATION_REQUIRED;
        self.identity.credentials = Some((user.into(), password.into()));
    }

    /// Disconnect after this much time without data-channel activity.
    /// Zero disables the check entirely.
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
    }

    /// How long the receive loop waits for any message before giving up.
    /// The master's keepalive ping normally arrives well within this window,
    /// so expiry means the link is gone.
    pub fn set_message_timeout(&mut self, timeout: Duration) {
        self.message_timeout = timeout;
    }

    /// Flag that requests a cooperative shutdown of a running session.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Register a port. Setup-time only.
    pub fn add_port(&mut self, port: impl Into<Port>) -> Result<()> {
        let port = port.into();
        if self.find_port(port.id()).is_some() {
            return Err(ProtocolError::Port(PortError::new(
                PortErrorKind::InvalidRange,
                port.id(),
                "duplicate port ID",
            )));
        }
        self.ports.push(port);
        Ok(())
    }

    /// Register a port group. Setup-time only.
    pub fn add_group(&mut self, group: PortGroup) -> Result<()> {
        self.groups.add(group).map_err(ProtocolError::Port)
    }

    pub fn find_port(&self, id: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.id() == id)
    }

    pub fn find_port_mut(&mut self, id: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.id() == id)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }

    pub fn groups(&self) -> &PortGroups {
        &self.groups
    }

    /// Prepare all ports. Invoked once before the device starts serving.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        for port in &mut self.ports {
            port.prepare()?;
        }
        self.prepared = true;
        Ok(())
    }

    /// Serve one master connection until it ends.
    ///
    /// `work` is the device's work function, run from the receive loop's
    /// housekeeping slot; it may mutate port state (internally sourced
    /// changes) and its errors end the session.
    pub fn run<R: Read, W: Write, F>(
        &mut self,
        reader: &mut MessageReader<R>,
        writer: &mut MessageWriter<W>,
        mut work: F,
    ) -> Result<DisconnectReason>
    where
        F: FnMut(&mut [Port]) -> std::result::Result<(), PortError>,
    {
        self.prepare()?;
        self.shutdown.store(false, Ordering::Relaxed);

        let handshake = handshake_slave(reader, writer, &self.identity)?;
        info!(
            master = %handshake.master_name,
            slave = %self.identity.name,
            "master connected"
        );
        self.last_activity = Instant::now();

        loop {
            let timeout = self.message_timeout;
            let receive_result = {
                let ports = &mut self.ports;
                let shutdown = &self.shutdown;
                reader.read_message_timeout(timeout, || {
                    if shutdown.load(Ordering::Relaxed) {
                        return Err(std::io::Error::other("shutdown requested"));
                    }
                    work(ports.as_mut_slice()).map_err(std::io::Error::other)?;
                    emit_auto_refresh(ports, writer)
                        .map_err(|e| std::io::Error::other(e.to_string()))?;
                    Ok(())
                })
            };

            let message = match receive_result {
                Ok(message) => message,
                Err(err) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        let _ = send_disconnect(writer);
                        return Ok(DisconnectReason::Shutdown);
                    }
                    return Err(err.into());
                }
            };

            if message.channel == CONTROL {
                match ControlMessage::parse(&message.payload) {
                    Some(ControlMessage::Disconnect) => {
                        info!("master disconnected");
                        return Ok(DisconnectReason::MasterDisconnect);
                    }
                    Some(ControlMessage::Error { code, text }) => {
                        warn!(code, %text, "master reported an error");
                        return Err(ProtocolError::Device {
                            code,
                            message: text,
                        });
                    }
                    Some(ControlMessage::Debug(text)) => {
                        info!(%text, "debug message from master");
                    }
                    Some(other) => debug!(?other, "ignoring control message"),
                    // unrecognised control payloads (e.g. the keepalive ping)
                    None => {}
                }
                if self.idle_timeout_reached(writer)? {
                    return Ok(DisconnectReason::IdleTimeout);
                }
            } else {
                if self.dispatch_streaming(&message)? {
                    continue;
                }
                match self.handle_data_message(message.channel, &message.payload, writer) {
                    Ok(()) => {
                        // data-channel traffic counts as activity
                        self.last_activity = Instant::now();
                    }
                    Err(err) => {
                        let code = codes::for_protocol_error(&err);
                        let _ = writer.send(
                            CONTROL,
                            &ControlMessage::Error {
                                code,
                                text: err.to_string(),
                            }
                            .to_payload(),
                        );
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Control-channel traffic checks the idle clock; on expiry the slave
    /// announces itself and disconnects.
    fn idle_timeout_reached<W: Write>(&mut self, writer: &mut MessageWriter<W>) -> Result<bool> {
        if self.idle_timeout.is_zero() {
            return Ok(false);
        }
        if self.last_activity.elapsed() <= self.idle_timeout {
            return Ok(false);
        }
        info!(timeout = ?self.idle_timeout, "idle timeout reached, disconnecting");
        let _ = send_debug(writer, "Idle timeout!");
        let _ = send_disconnect(writer);
        Ok(true)
    }

    /// Route data arriving on a channel bound to a streaming port.
    fn dispatch_streaming(&mut self, message: &opdi_frame::Message) -> Result<bool> {
        for port in &mut self.ports {
            if let Port::Streaming(streaming) = port {
                if streaming.is_bound() && streaming.channel() == message.channel {
                    streaming.data_received(&message.payload).map_err(|e| {
                        ProtocolError::Protocol(format!(
                            "streaming port {} rejected data: {e}",
                            streaming.base().id()
                        ))
                    })?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn handle_data_message<W: Write>(
        &mut self,
        channel: u16,
        payload: &str,
        writer: &mut MessageWriter<W>,
    ) -> Result<()> {
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() > MAX_MESSAGE_PARTS {
            return Err(ProtocolError::TooManyParts {
                count: parts.len(),
                max: MAX_MESSAGE_PARTS,
            });
        }

        match parts[0] {
            tokens::GET_DEVICE_CAPS => {
                let payload = self.device_caps_payload();
                writer.send(channel, &payload)?;
            }
            tokens::GET_PORT_INFO => {
                let id = required_part(&parts, 1)?;
                let port = self.port_by_id(id)?;
                let payload = port.descriptor().serialize();
                writer.send(channel, &payload)?;
            }

            tokens::GET_DIGITAL_STATE => {
                let id = required_part(&parts, 1)?;
                let payload = digital_state_payload(self.digital_port(id)?)?;
                writer.send(channel, &payload)?;
            }
            tokens::SET_DIGITAL_MODE => {
                let id = required_part(&parts, 1)?;
                let mode = DigitalMode::from_wire(required_part(&parts, 2)?)
                    .ok_or_else(|| conversion_error("digital mode", &parts))?;
                let port = self.digital_port_mut(id)?;
                port.set_mode(mode, ChangeSource::External)?;
                let payload = digital_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }
            tokens::SET_DIGITAL_LINE => {
                let id = required_part(&parts, 1)?;
                let line = DigitalLine::from_wire(required_part(&parts, 2)?)
                    .ok_or_else(|| conversion_error("digital line", &parts))?;
                let port = self.digital_port_mut(id)?;
                port.set_line(line, ChangeSource::External)?;
                let payload = digital_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }

            tokens::GET_ANALOG_STATE => {
                let id = required_part(&parts, 1)?;
                let payload = analog_state_payload(self.analog_port(id)?)?;
                writer.send(channel, &payload)?;
            }
            tokens::SET_ANALOG_VALUE => {
                let id = required_part(&parts, 1)?;
                let value: i32 = required_part(&parts, 2)?
                    .parse()
                    .map_err(|_| conversion_error("analog value", &parts))?;
                let port = self.analog_port_mut(id)?;
                port.set_value(value, ChangeSource::External)?;
                let payload = analog_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }
            tokens::SET_ANALOG_MODE => {
                let id = required_part(&parts, 1)?;
                let mode = AnalogMode::from_wire(required_part(&parts, 2)?)
                    .ok_or_else(|| conversion_error("analog mode", &parts))?;
                let port = self.analog_port_mut(id)?;
                port.set_mode(mode, ChangeSource::External)?;
                let payload = analog_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }
            tokens::SET_ANALOG_RESOLUTION => {
                let id = required_part(&parts, 1)?;
                let resolution: u8 = required_part(&parts, 2)?
                    .parse()
                    .map_err(|_| conversion_error("analog resolution", &parts))?;
                let port = self.analog_port_mut(id)?;
                port.set_resolution(resolution, ChangeSource::External)?;
                let payload = analog_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }
            tokens::SET_ANALOG_REFERENCE => {
                let id = required_part(&parts, 1)?;
                let reference = AnalogReference::from_wire(required_part(&parts, 2)?)
                    .ok_or_else(|| conversion_error("analog reference", &parts))?;
                let port = self.analog_port_mut(id)?;
                port.set_reference(reference, ChangeSource::External)?;
                let payload = analog_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }

            tokens::GET_SELECT_STATE => {
                let id = required_part(&parts, 1)?;
                let payload = select_state_payload(self.select_port(id)?)?;
                writer.send(channel, &payload)?;
            }
            tokens::GET_SELECT_LABEL => {
                let id = required_part(&parts, 1)?;
                let position: u16 = required_part(&parts, 2)?
                    .parse()
                    .map_err(|_| conversion_error("select position", &parts))?;
                let port = self.select_port(id)?;
                let label = port.label_at(position)?;
                let payload = format!("{}:{id}:{position}:{label}", tokens::SELECT_LABEL);
                writer.send(channel, &payload)?;
            }
            tokens::SET_SELECT_POSITION => {
                let id = required_part(&parts, 1)?;
                let position: u16 = required_part(&parts, 2)?
                    .parse()
                    .map_err(|_| conversion_error("select position", &parts))?;
                let port = self.select_port_mut(id)?;
                port.set_position(position, ChangeSource::External)?;
                let payload = select_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }

            tokens::GET_DIAL_STATE => {
                let id = required_part(&parts, 1)?;
                let payload = dial_state_payload(self.dial_port(id)?)?;
                writer.send(channel, &payload)?;
            }
            tokens::SET_DIAL_POSITION => {
                let id = required_part(&parts, 1)?;
                let position: i64 = required_part(&parts, 2)?
                    .parse()
                    .map_err(|_| conversion_error("dial position", &parts))?;
                let port = self.dial_port_mut(id)?;
                port.set_position(position, ChangeSource::External)?;
                let payload = dial_state_payload(port)?;
                self.persist_if_needed(id);
                writer.send(channel, &payload)?;
            }

            tokens::BIND_STREAMING_PORT => {
                let id = required_part(&parts, 1)?;
                let bind_channel: u16 = required_part(&parts, 2)?
                    .parse()
                    .map_err(|_| conversion_error("streaming channel", &parts))?;
                let port = self.streaming_port_mut(id)?;
                match port.bind(bind_channel) {
                    Ok(()) => writer.send(channel, control::AGREEMENT)?,
                    Err(err) => {
                        writer.send(
                            channel,
                            &format!("{}:{}", control::DISAGREEMENT, err.reason),
                        )?;
                    }
                }
            }
            tokens::UNBIND_STREAMING_PORT => {
                let id = required_part(&parts, 1)?;
                let port = self.streaming_port_mut(id)?;
                port.unbind();
                writer.send(channel, control::AGREEMENT)?;
            }

            // unknown messages are ignored
            other => debug!(magic = %other, "ignoring unknown message"),
        }
        Ok(())
    }

    /// The `BDC` payload listing all non-hidden port IDs.
    fn device_caps_payload(&self) -> String {
        let ids: Vec<&str> = self
            .ports
            .iter()
            .filter(|p| !p.base().hidden())
            .map(|p| p.id())
            .collect();
        format!("{}:{}", tokens::DEVICE_CAPS, ids.join(","))
    }

    fn persist_if_needed(&self, id: &str) {
        if let Some(port) = self.find_port(id) {
            if port.base().persistent() {
                // persistence backends are device glue; the protocol core
                // only reports the intent
                debug!(port = id, "port state marked for persistence");
            }
        }
    }

    fn port_by_id(&self, id: &str) -> Result<&Port> {
        self.find_port(id).ok_or_else(|| unknown_port(id))
    }

    fn port_by_id_mut(&mut self, id: &str) -> Result<&mut Port> {
        self.ports
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or_else(|| unknown_port(id))
    }

    fn digital_port(&self, id: &str) -> Result<&DigitalPort> {
        match self.port_by_id(id)? {
            Port::Digital(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "digital")),
        }
    }

    fn digital_port_mut(&mut self, id: &str) -> Result<&mut DigitalPort> {
        match self.port_by_id_mut(id)? {
            Port::Digital(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "digital")),
        }
    }

    fn analog_port(&self, id: &str) -> Result<&AnalogPort> {
        match self.port_by_id(id)? {
            Port::Analog(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "analog")),
        }
    }

    fn analog_port_mut(&mut self, id: &str) -> Result<&mut AnalogPort> {
        match self.port_by_id_mut(id)? {
            Port::Analog(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "analog")),
        }
    }

    fn select_port(&self, id: &str) -> Result<&SelectPort> {
        match self.port_by_id(id)? {
            Port::Select(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "select")),
        }
    }

    fn select_port_mut(&mut self, id: &str) -> Result<&mut SelectPort> {
        match self.port_by_id_mut(id)? {
            Port::Select(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "select")),
        }
    }

    fn dial_port(&self, id: &str) -> Result<&DialPort> {
        match self.port_by_id(id)? {
            Port::Dial(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "dial")),
        }
    }

    fn dial_port_mut(&mut self, id: &str) -> Result<&mut DialPort> {
        match self.port_by_id_mut(id)? {
            Port::Dial(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "dial")),
        }
    }

    fn streaming_port_mut(&mut self, id: &str) -> Result<&mut opdi_port::StreamingPort> {
        match self.port_by_id_mut(id)? {
            Port::Streaming(port) => Ok(port),
            other => Err(wrong_port_type(id, other.type_name(), "streaming")),
        }
    }
}

fn unknown_port(id: &str) -> ProtocolError {
    ProtocolError::Device {
        code: codes::PORT_UNKNOWN,
        message: format!("unknown port {id:?}"),
    }
}

fn wrong_port_type(id: &str, actual: &str, expected: &str) -> ProtocolError {
    ProtocolError::Port(PortError::new(
        PortErrorKind::WrongPortType,
        id,
        format!("is a {actual} port, operation requires {expected}"),
    ))
}

fn required_part<'a>(parts: &[&'a str], index: usize) -> Result<&'a str> {
    parts.get(index).copied().ok_or_else(|| {
        ProtocolError::Protocol(format!(
            "message {:?} is missing part {index}",
            parts.first().copied().unwrap_or_default()
        ))
    })
}

fn conversion_error(what: &str, parts: &[&str]) -> ProtocolError {
    ProtocolError::Protocol(format!("cannot parse {what} in {:?}", parts.join(":")))
}

fn digital_state_payload(port: &DigitalPort) -> Result<String> {
    let (mode, line) = port.state()?;
    Ok(format!(
        "{}:{}:{}:{}",
        tokens::DIGITAL_STATE,
        port.base().id(),
        mode.as_wire(),
        line.as_wire()
    ))
}

fn analog_state_payload(port: &AnalogPort) -> Result<String> {
    let (mode, reference, resolution, value) = port.state()?;
    Ok(format!(
        "{}:{}:{}:{}:{}:{}",
        tokens::ANALOG_STATE,
        port.base().id(),
        mode.as_wire(),
        reference.as_wire(),
        resolution,
        value
    ))
}

fn select_state_payload(port: &SelectPort) -> Result<String> {
    let position = port.state()?;
    Ok(format!(
        "{}:{}:{}",
        tokens::SELECT_STATE,
        port.base().id(),
        position
    ))
}

fn dial_state_payload(port: &DialPort) -> Result<String> {
    let position = port.state()?;
    Ok(format!(
        "{}:{}:{}",
        tokens::DIAL_STATE,
        port.base().id(),
        position
    ))
}

/// Send an unsolicited Refresh for the listed ports (empty list: refresh
/// everything). The part count is capped by the protocol.
pub fn send_refresh<W: Write>(writer: &mut MessageWriter<W>, ids: &[&str]) -> Result<()> {
    if ids.len() + 1 > MAX_MESSAGE_PARTS {
        return Err(ProtocolError::TooManyParts {
            count: ids.len() + 1,
            max: MAX_MESSAGE_PARTS,
        });
    }
    let message = ControlMessage::Refresh(ids.iter().map(|s| s.to_string()).collect());
    writer.send(CONTROL, &message.to_payload())?;
    Ok(())
}

/// Prompt the master to re-read the device capabilities.
pub fn send_reconfigure<W: Write>(writer: &mut MessageWriter<W>) -> Result<()> {
    writer.send(CONTROL, control::RECONFIGURE)?;
    Ok(())
}

/// Send a debug message to the master.
pub fn send_debug<W: Write>(writer: &mut MessageWriter<W>, text: &str) -> Result<()> {
    writer.send(CONTROL, &ControlMessage::Debug(text.to_string()).to_payload())?;
    Ok(())
}

/// Send the disconnect message. After this, no more messages may be sent.
pub fn send_disconnect<W: Write>(writer: &mut MessageWriter<W>) -> Result<()> {
    writer.send(CONTROL, control::DISCONNECT)?;
    Ok(())
}

/// Collect ports flagged refresh-required and announce them, chunked to the
/// message part limit.
fn emit_auto_refresh<W: Write>(ports: &mut [Port], writer: &mut MessageWriter<W>) -> Result<()> {
    let ids: Vec<String> = ports
        .iter_mut()
        .filter(|p| p.base().refresh_required())
        .map(|p| {
            p.base_mut().take_refresh_required();
            p.id().to_string()
        })
        .collect();

    for chunk in ids.chunks(MAX_MESSAGE_PARTS - 1) {
        let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
        send_refresh(writer, &refs)?;
    }
    Ok(())
}
