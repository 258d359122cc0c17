//! Master-side device/connection session.
//!
//! A [`Device`] owns the connection lifecycle: `Disconnected → Connecting →
//! Connected → Disconnected`. Connecting runs in a background thread (or
//! inline via [`Device::connect_blocking`]); once the handshake succeeds a
//! reader thread feeds the synchronous-reply queue and dispatches
//! control-channel messages to the listener, and a ping thread keeps the
//! link alive.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use opdi_frame::{FrameError, Message, MessageConfig, MessageReader, MessageWriter, CONTROL};
use opdi_transport::{DeviceStream, TcpEndpoint};
use tracing::{debug, info, warn};

use crate::addr::DeviceAddress;
use crate::control::ControlMessage;
use crate::error::{ProtocolError, Result};
use crate::handshake::{handshake_master, MasterHandshakeConfig};
use crate::master::{create_protocol, MasterProtocol, MessageChannel, PingRunner, PING_INTERVAL};

/// Connection state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Callbacks for connection lifecycle and control-channel events.
///
/// All methods have empty defaults; implement what you need. Callbacks run
/// on the device's background threads.
pub trait DeviceListener: Send + Sync {
    fn status_changed(&self, _device_id: &str, _status: DeviceStatus) {}
    fn connected(&self, _device_id: &str, _slave_name: &str) {}
    fn connect_failed(&self, _device_id: &str, _message: &str) {}
    fn disconnected(&self, _device_id: &str) {}
    fn debug_received(&self, _device_id: &str, _text: &str) {}
    fn refresh_received(&self, _device_id: &str, _ports: &[String]) {}
    fn reconfigure_received(&self, _device_id: &str) {}
    fn error_received(&self, _device_id: &str, _code: u8, _text: &str) {}
}

/// No-op listener for callers that only use the synchronous API.
pub struct NullListener;

impl DeviceListener for NullListener {}

/// Supplies credentials when a slave demands authentication and the device
/// address does not embed any.
pub trait CredentialsCallback: Send + Sync {
    /// Return `None` to cancel the connection attempt.
    fn credentials(&self, device_id: &str) -> Option<(String, String)>;
}

/// Tunables for a device session.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub handshake: MasterHandshakeConfig,
    pub ping_interval: Duration,
    pub message: MessageConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            handshake: MasterHandshakeConfig::default(),
            ping_interval: PING_INTERVAL,
            message: MessageConfig::default(),
        }
    }
}

/// Shared connection state; implements [`MessageChannel`] for the protocol.
struct Shared {
    id: String,
    status: Mutex<DeviceStatus>,
    connected: AtomicBool,
    abort: AtomicBool,
    queue: Mutex<VecDeque<Message>>,
    queue_cond: Condvar,
    writer: Mutex<Option<MessageWriter<DeviceStream>>>,
    stream: Mutex<Option<DeviceStream>>,
    last_send: Mutex<Instant>,
    protocol: Mutex<Option<Arc<MasterProtocol>>>,
    listener: Mutex<Option<Arc<dyn DeviceListener>>>,
}

impl Shared {
    fn new(id: String) -> Self {
        Self {
            id,
            status: Mutex::new(DeviceStatus::Disconnected),
            connected: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            queue_cond: Condvar::new(),
            writer: Mutex::new(None),
            stream: Mutex::new(None),
            last_send: Mutex::new(Instant::now()),
            protocol: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    fn listener(&self) -> Option<Arc<dyn DeviceListener>> {
        // cloned out so no lock is held across listener callbacks
        self.listener.lock().expect("listener poisoned").clone()
    }

    fn set_status(&self, status: DeviceStatus) {
        *self.status.lock().expect("status poisoned") = status;
        if let Some(listener) = self.listener() {
            listener.status_changed(&self.id, status);
        }
    }

    fn push_message(&self, message: Message) {
        self.queue
            .lock()
            .expect("queue poisoned")
            .push_back(message);
        self.queue_cond.notify_all();
    }

    /// Tear the session down once. Returns whether this call did the work
    /// (so callers notify the listener exactly once).
    fn teardown(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.lock().expect("stream poisoned").take() {
            let _ = stream.shutdown();
        }
        *self.writer.lock().expect("writer poisoned") = None;
        *self.protocol.lock().expect("protocol poisoned") = None;
        self.queue_cond.notify_all();
        if was_connected {
            self.set_status(DeviceStatus::Disconnected);
            if let Some(listener) = self.listener() {
                listener.disconnected(&self.id);
            }
        }
        was_connected
    }
}

impl MessageChannel for Shared {
    fn send_message(&self, message: &Message) -> Result<()> {
        let mut writer = self.writer.lock().expect("writer poisoned");
        let writer = writer
            .as_mut()
            .ok_or_else(|| ProtocolError::Disconnected("device is not connected".to_string()))?;
        writer.write_message(message)?;
        *self.last_send.lock().expect("last_send poisoned") = Instant::now();
        Ok(())
    }

    fn expect(&self, channel: u16, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().expect("queue poisoned");
        loop {
            if let Some(pos) = queue.iter().position(|m| m.channel == channel) {
                return Ok(queue.remove(pos).expect("position just found"));
            }
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ProtocolError::Disconnected(
                    "device disconnected while waiting for reply".to_string(),
                ));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProtocolError::Timeout(timeout));
            }
            let (guard, _) = self
                .queue_cond
                .wait_timeout(queue, deadline - now)
                .expect("queue poisoned");
            queue = guard;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn last_send_elapsed(&self) -> Duration {
        self.last_send.lock().expect("last_send poisoned").elapsed()
    }
}

/// A remote OPDI device as seen from the master.
pub struct Device {
    id: String,
    address: DeviceAddress,
    config: DeviceConfig,
    shared: Arc<Shared>,
    ping: Mutex<Option<PingRunner>>,
}

impl Device {
    pub fn new(id: impl Into<String>, address: DeviceAddress) -> Self {
        Self::with_config(id, address, DeviceConfig::default())
    }

    pub fn with_config(id: impl Into<String>, address: DeviceAddress, config: DeviceConfig) -> Self {
        let id = id.into();
        Self {
            shared: Arc::new(Shared::new(id.clone())),
            id,
            address,
            config,
            ping: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn status(&self) -> DeviceStatus {
        *self.shared.status.lock().expect("status poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// The protocol of the current connection, if any.
    pub fn protocol(&self) -> Option<Arc<MasterProtocol>> {
        self.shared
            .protocol
            .lock()
            .expect("protocol poisoned")
            .clone()
    }

    /// Spawn a background connection attempt. Completion and failure are
    /// reported through the listener.
    pub fn connect(
        self: &Arc<Self>,
        listener: Arc<dyn DeviceListener>,
        credentials: Option<Arc<dyn CredentialsCallback>>,
    ) {
        let device = Arc::clone(self);
        thread::Builder::new()
            .name(format!("opdi-connect-{}", self.id))
            .spawn(move || {
                let _ = device.connect_blocking(listener, credentials);
            })
            .expect("failed to spawn connect thread");
    }

    /// Connect, handshake, and start the session threads. Blocks the caller.
    pub fn connect_blocking(
        &self,
        listener: Arc<dyn DeviceListener>,
        credentials: Option<Arc<dyn CredentialsCallback>>,
    ) -> Result<Arc<MasterProtocol>> {
        if self.status() != DeviceStatus::Disconnected {
            return Err(ProtocolError::Protocol(format!(
                "device {} is already connecting or connected",
                self.id
            )));
        }
        *self.shared.listener.lock().expect("listener poisoned") = Some(Arc::clone(&listener));
        self.shared.abort.store(false, Ordering::SeqCst);
        self.shared.set_status(DeviceStatus::Connecting);

        let mut handshake = self.config.handshake.clone();
        if handshake.credentials.is_none() {
            handshake.credentials = self.address.credentials();
        }

        let mut result = self.establish(&handshake);
        // a slave demanding authentication gets one retry with credentials
        // from the callback
        if let (Err(ProtocolError::AuthenticationFailed(_)), None, Some(callback)) =
            (&result, &handshake.credentials, &credentials)
        {
            match callback.credentials(&self.id) {
                Some((user, password)) => {
                    handshake.credentials = Some((user, password));
                    result = self.establish(&handshake);
                }
                None => result = Err(ProtocolError::Aborted),
            }
        }

        match result {
            Ok(protocol) => Ok(protocol),
            Err(err) => {
                self.shared.teardown();
                self.shared.set_status(DeviceStatus::Disconnected);
                listener.connect_failed(&self.id, &err.to_string());
                Err(err)
            }
        }
    }

    /// One connection attempt: TCP connect, handshake, session startup.
    fn establish(&self, handshake: &MasterHandshakeConfig) -> Result<Arc<MasterProtocol>> {
        let stream = TcpEndpoint::connect(self.address.socket_addr())?;
        let abort_handle = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        *self.shared.stream.lock().expect("stream poisoned") = Some(abort_handle);

        if self.shared.abort.load(Ordering::SeqCst) {
            return Err(ProtocolError::Aborted);
        }

        let mut reader = MessageReader::for_stream(stream, self.config.message.clone())?;
        let mut writer = MessageWriter::for_stream(writer_stream, self.config.message.clone());

        let outcome = handshake_master(&mut reader, &mut writer, handshake)?;
        if self.shared.abort.load(Ordering::SeqCst) {
            return Err(ProtocolError::Aborted);
        }
        info!(
            device = %self.id,
            slave = %outcome.slave_name,
            protocol = %outcome.protocol_magic,
            "handshake complete"
        );

        *self.shared.writer.lock().expect("writer poisoned") = Some(writer);
        self.shared.connected.store(true, Ordering::SeqCst);

        let channel: Arc<dyn MessageChannel> = self.shared.clone();
        let protocol = create_protocol(&outcome.protocol_magic, channel).ok_or_else(|| {
            ProtocolError::Protocol(format!(
                "no protocol implementation for magic {:?}",
                outcome.protocol_magic
            ))
        })?;
        *self.shared.protocol.lock().expect("protocol poisoned") = Some(Arc::clone(&protocol));

        self.spawn_reader(reader, Arc::clone(&protocol));
        let ping_channel: Arc<dyn MessageChannel> = self.shared.clone();
        *self.ping.lock().expect("ping poisoned") =
            Some(PingRunner::start(ping_channel, self.config.ping_interval));

        self.shared.set_status(DeviceStatus::Connected);
        if let Some(listener) = self.shared.listener() {
            listener.connected(&self.id, &outcome.slave_name);
        }
        Ok(protocol)
    }

    fn spawn_reader(&self, mut reader: MessageReader<DeviceStream>, protocol: Arc<MasterProtocol>) {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("opdi-reader-{}", self.id))
            .spawn(move || loop {
                let result = reader.read_message_timeout(Duration::from_secs(60), || {
                    if shared.is_connected() {
                        Ok(())
                    } else {
                        Err(std::io::Error::other("session closed"))
                    }
                });
                match result {
                    Ok(message) if message.channel == CONTROL => {
                        if !handle_control(&shared, &protocol, &message) {
                            return;
                        }
                    }
                    Ok(message) => shared.push_message(message),
                    Err(FrameError::Timeout(_)) => continue,
                    Err(err) => {
                        if shared.is_connected() {
                            warn!(device = %shared.id, error = %err, "link lost");
                            shared.teardown();
                        }
                        return;
                    }
                }
            })
            .expect("failed to spawn reader thread");
    }

    /// Cancel an in-flight connection attempt. Safe to call from any state;
    /// closing the transport is what unblocks a pending read.
    pub fn abort_connect(&self) {
        self.shared.abort.store(true, Ordering::SeqCst);
        if let Some(stream) = self.shared.stream.lock().expect("stream poisoned").as_ref() {
            let _ = stream.shutdown();
        }
    }

    /// Disconnect from the device, announcing it when the link still works.
    pub fn disconnect(&self) {
        if let Some(protocol) = self.protocol() {
            protocol.send_disconnect();
        }
        if let Some(ping) = self.ping.lock().expect("ping poisoned").take() {
            ping.stop();
        }
        self.shared.teardown();
        debug!(device = %self.id, "disconnected");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

/// Dispatch one control-channel message. Returns false when the session is
/// over and the reader thread must exit.
fn handle_control(shared: &Arc<Shared>, protocol: &Arc<MasterProtocol>, message: &Message) -> bool {
    let listener = shared.listener();
    match ControlMessage::parse(&message.payload) {
        Some(ControlMessage::Disconnect) => {
            info!(device = %shared.id, "slave disconnected");
            shared.teardown();
            false
        }
        Some(ControlMessage::Reconfigure) => {
            protocol.invalidate_capabilities();
            if let Some(listener) = listener {
                listener.reconfigure_received(&shared.id);
            }
            true
        }
        Some(ControlMessage::Debug(text)) => {
            debug!(device = %shared.id, %text, "debug message from slave");
            if let Some(listener) = listener {
                listener.debug_received(&shared.id, &text);
            }
            true
        }
        Some(ControlMessage::Refresh(ports)) => {
            if let Some(listener) = listener {
                listener.refresh_received(&shared.id, &ports);
            }
            true
        }
        Some(ControlMessage::Error { code, text }) => {
            warn!(device = %shared.id, code, %text, "slave reported an error");
            if let Some(listener) = listener {
                listener.error_received(&shared.id, code, &text);
            }
            shared.teardown();
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_address(port: u16) -> DeviceAddress {
        DeviceAddress {
            user: None,
            password: None,
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn expect_times_out_on_empty_queue() {
        let shared = Shared::new("dev".to_string());
        shared.connected.store(true, Ordering::SeqCst);
        let err = shared.expect(16, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)));
    }

    #[test]
    fn expect_returns_matching_channel_only() {
        let shared = Arc::new(Shared::new("dev".to_string()));
        shared.connected.store(true, Ordering::SeqCst);
        shared.push_message(Message::new(17, "DS:a:0:0"));
        shared.push_message(Message::new(16, "DS:b:0:0"));

        let message = shared.expect(16, Duration::from_millis(100)).unwrap();
        assert_eq!(message.payload, "DS:b:0:0");
        // the other message stays queued
        assert_eq!(shared.queue.lock().unwrap().len(), 1);
    }

    #[test]
    fn expect_unblocks_on_disconnect() {
        let shared = Arc::new(Shared::new("dev".to_string()));
        shared.connected.store(true, Ordering::SeqCst);

        let waiter = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.expect(16, Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(30));
        shared.teardown();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(ProtocolError::Disconnected(_))));
    }

    #[test]
    fn connect_failure_reports_listener_and_resets_status() {
        use std::sync::atomic::AtomicUsize;

        struct CountingListener {
            failures: AtomicUsize,
        }
        impl DeviceListener for CountingListener {
            fn connect_failed(&self, _id: &str, _message: &str) {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }

        // bind-then-drop gives a port that very likely refuses connections
        let port = {
            let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
            endpoint.local_addr().port()
        };

        let listener = Arc::new(CountingListener {
            failures: AtomicUsize::new(0),
        });
        let device = Device::new("dev", loopback_address(port));
        let result = device.connect_blocking(listener.clone(), None);

        assert!(result.is_err());
        assert_eq!(device.status(), DeviceStatus::Disconnected);
        assert_eq!(listener.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_connect_is_safe_when_disconnected() {
        let device = Device::new("dev", loopback_address(1));
        device.abort_connect();
        assert_eq!(device.status(), DeviceStatus::Disconnected);
    }
}
