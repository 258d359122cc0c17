//! The OPDI connection handshake, master and slave halves.
//!
//! All handshake traffic runs on the control channel:
//!
//! 1. master: `OPDI:0.1:<flags>:<encryptions>`
//! 2. slave: `OPDI:0.1:<encoding>:<encryption>:<flags>:<protocols>`
//! 3. master: `<protocol-magic>:<languages>:<master-name>`
//! 4. slave: `OK:<slave-name>`
//! 5. optional credential exchange (`Auth:<user>:<password>` → `OK`/`NOK`)
//!
//! Encryption negotiation is not supported: a master that requires it is
//! turned away, and the slave always offers an empty encryption list.

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use opdi_frame::{MessageReader, MessageWriter, CONTROL};
use tracing::debug;

use crate::control;
use crate::error::{ProtocolError, Result};

/// Handshake tag expected from both sides.
pub const HANDSHAKE_MAGIC: &str = "OPDI";
/// Protocol version. Mismatches abort the handshake.
pub const HANDSHAKE_VERSION: &str = "0.1";
/// Magic of the basic protocol.
pub const BASIC_PROTOCOL_MAGIC: &str = "BP";

/// Default timeout for synchronous exchanges and handshake steps.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the credential exchange; the user may have to type.
pub const AUTHENTICATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Device/master flag: peer requires encryption.
pub const FLAG_ENCRYPTION_REQUIRED: i32 = 0x01;
/// Device/master flag: peer refuses encryption.
pub const FLAG_ENCRYPTION_NOT_ALLOWED: i32 = 0x02;
/// Device flag: slave requires authentication.
pub const FLAG_AUTHENTICATION_REQUIRED: i32 = 0x04;

/// Master-side handshake parameters.
#[derive(Clone)]
pub struct MasterHandshakeConfig {
    /// Master flags sent in the first handshake message.
    pub flags: i32,
    /// Preferred languages, comma-separated.
    pub languages: String,
    /// Name announced to the slave.
    pub master_name: String,
    /// Credentials for slaves that require authentication.
    pub credentials: Option<(String, String)>,
    pub timeout: Duration,
    pub auth_timeout: Duration,
}

impl Default for MasterHandshakeConfig {
    fn default() -> Self {
        Self {
            flags: 0,
            languages: "en".to_string(),
            master_name: "opdi-master".to_string(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            auth_timeout: AUTHENTICATION_TIMEOUT,
        }
    }
}

impl fmt::Debug for MasterHandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterHandshakeConfig")
            .field("flags", &self.flags)
            .field("languages", &self.languages)
            .field("master_name", &self.master_name)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|(user, _)| {
                    format!("{user}:<redacted>")
                }),
            )
            .field("timeout", &self.timeout)
            .field("auth_timeout", &self.auth_timeout)
            .finish()
    }
}

/// Slave-side identity and handshake parameters.
#[derive(Clone)]
pub struct SlaveIdentity {
    pub name: String,
    pub encoding: String,
    /// Device flags advertised to the master.
    pub flags: i32,
    /// Supported protocol magics, comma-separated.
    pub protocols: String,
    /// Expected credentials when [`FLAG_AUTHENTICATION_REQUIRED`] is set.
    pub credentials: Option<(String, String)>,
    pub timeout: Duration,
    pub auth_timeout: Duration,
}

impl SlaveIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            encoding: "utf-8".to_string(),
            flags: 0,
            protocols: BASIC_PROTOCOL_MAGIC.to_string(),
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            auth_timeout: AUTHENTICATION_TIMEOUT,
        }
    }
}

impl fmt::Debug for SlaveIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlaveIdentity")
            .field("name", &self.name)
            .field("encoding", &self.encoding)
            .field("flags", &self.flags)
            .field("protocols", &self.protocols)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|(user, _)| {
                    format!("{user}:<redacted>")
                }),
            )
            .finish()
    }
}

/// Result of a successful master-side handshake.
#[derive(Debug, Clone)]
pub struct MasterHandshake {
    /// Name supplied by the slave.
    pub slave_name: String,
    /// Device flags advertised by the slave.
    pub slave_flags: i32,
    /// Text encoding the slave uses.
    pub encoding: String,
    /// Negotiated protocol magic.
    pub protocol_magic: String,
}

/// Result of a successful slave-side handshake.
#[derive(Debug, Clone)]
pub struct SlaveHandshake {
    pub master_name: String,
    pub languages: String,
    /// Protocol magic the master selected. Unknown magics fall back to the
    /// basic protocol.
    pub protocol_magic: String,
}

/// Receive one control-channel message, surfacing disconnects and peer
/// errors.
fn expect_control<R: Read>(
    reader: &mut MessageReader<R>,
    timeout: Duration,
) -> Result<Vec<String>> {
    let message = reader.read_message_timeout(timeout, || Ok(()))?;
    if message.channel != CONTROL {
        return Err(ProtocolError::Protocol(format!(
            "expected control channel message, got channel {}",
            message.channel
        )));
    }
    let parts: Vec<String> = message.payload.split(':').map(str::to_string).collect();
    match parts[0].as_str() {
        control::DISCONNECT => Err(ProtocolError::Disconnected(
            "peer disconnected during handshake".to_string(),
        )),
        control::ERROR => match crate::control::ControlMessage::parse(&message.payload) {
            Some(crate::control::ControlMessage::Error { code, text }) => {
                Err(ProtocolError::Device { code, message: text })
            }
            _ => Err(ProtocolError::Protocol("malformed error message".to_string())),
        },
        _ => Ok(parts),
    }
}

/// Perform the master half of the handshake.
pub fn handshake_master<R: Read, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
    config: &MasterHandshakeConfig,
) -> Result<MasterHandshake> {
    // no encryption offered, hence the empty trailing part
    writer.send(
        CONTROL,
        &format!("{HANDSHAKE_MAGIC}:{HANDSHAKE_VERSION}:{}:", config.flags),
    )?;

    let parts = expect_control(reader, config.timeout)?;
    if parts.len() != 6 {
        return Err(ProtocolError::Protocol(format!(
            "handshake reply has {} parts, expected 6",
            parts.len()
        )));
    }
    if parts[0] != HANDSHAKE_MAGIC {
        return Err(ProtocolError::Protocol(format!(
            "unexpected handshake tag {:?}",
            parts[0]
        )));
    }
    if parts[1] != HANDSHAKE_VERSION {
        return Err(ProtocolError::Handshake(format!(
            "unsupported protocol version {:?} (expected {HANDSHAKE_VERSION})",
            parts[1]
        )));
    }

    let encoding = parts[2].clone();
    if !parts[3].is_empty() {
        return Err(ProtocolError::Handshake(format!(
            "slave selected encryption {:?}, which is not supported",
            parts[3]
        )));
    }
    let slave_flags: i32 = parts[4]
        .parse()
        .map_err(|_| ProtocolError::Protocol(format!("bad device flags {:?}", parts[4])))?;

    if !parts[5].split(',').any(|p| p == BASIC_PROTOCOL_MAGIC) {
        return Err(ProtocolError::Handshake(format!(
            "slave supports none of our protocols (offered {:?})",
            parts[5]
        )));
    }

    writer.send(
        CONTROL,
        &format!(
            "{BASIC_PROTOCOL_MAGIC}:{}:{}",
            config.languages, config.master_name
        ),
    )?;

    let parts = expect_control(reader, config.timeout)?;
    if parts[0] == control::DISAGREEMENT {
        return Err(ProtocolError::Handshake(format!(
            "slave refused connection: {}",
            parts[1..].join(":")
        )));
    }
    if parts[0] != control::AGREEMENT || parts.len() < 2 {
        return Err(ProtocolError::Protocol(
            "expected slave name agreement".to_string(),
        ));
    }
    let slave_name = parts[1..].join(":");

    if slave_flags & FLAG_AUTHENTICATION_REQUIRED != 0 {
        let (user, password) = config.credentials.clone().ok_or_else(|| {
            ProtocolError::AuthenticationFailed(
                "slave requires authentication but no credentials are available".to_string(),
            )
        })?;
        writer.send(
            CONTROL,
            &format!("{}:{user}:{password}", control::AUTHENTICATE),
        )?;
        let parts = expect_control(reader, config.auth_timeout)?;
        if parts[0] != control::AGREEMENT {
            return Err(ProtocolError::AuthenticationFailed(parts[1..].join(":")));
        }
        debug!(slave = %slave_name, "authenticated");
    }

    Ok(MasterHandshake {
        slave_name,
        slave_flags,
        encoding,
        protocol_magic: BASIC_PROTOCOL_MAGIC.to_string(),
    })
}

/// Perform the slave half of the handshake.
pub fn handshake_slave<R: Read, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
    identity: &SlaveIdentity,
) -> Result<SlaveHandshake> {
    let parts = expect_control(reader, identity.timeout)?;
    if parts.len() != 4 {
        return Err(ProtocolError::Protocol(format!(
            "handshake has {} parts, expected 4",
            parts.len()
        )));
    }
    if parts[0] != HANDSHAKE_MAGIC {
        return Err(ProtocolError::Protocol(format!(
            "unexpected handshake tag {:?}",
            parts[0]
        )));
    }
    if parts[1] != HANDSHAKE_VERSION {
        return Err(ProtocolError::Handshake(format!(
            "unsupported protocol version {:?} (expected {HANDSHAKE_VERSION})",
            parts[1]
        )));
    }
    let master_flags: i32 = parts[2]
        .parse()
        .map_err(|_| ProtocolError::Protocol(format!("bad master flags {:?}", parts[2])))?;

    if master_flags & FLAG_ENCRYPTION_REQUIRED != 0 {
        let _ = writer.send(
            CONTROL,
            &format!("{}:encryption not supported", control::DISAGREEMENT),
        );
        return Err(ProtocolError::Handshake(
            "master requires encryption, which is not supported".to_string(),
        ));
    }

    // empty encryption part: the handshake stays plaintext
    writer.send(
        CONTROL,
        &format!(
            "{HANDSHAKE_MAGIC}:{HANDSHAKE_VERSION}:{}::{}:{}",
            identity.encoding, identity.flags, identity.protocols
        ),
    )?;

    let parts = expect_control(reader, identity.timeout)?;
    if parts.len() != 3 {
        return Err(ProtocolError::Protocol(format!(
            "protocol selection has {} parts, expected 3",
            parts.len()
        )));
    }
    // unknown protocol magics fall back to the basic protocol
    let protocol_magic = if parts[0] == BASIC_PROTOCOL_MAGIC {
        parts[0].clone()
    } else {
        debug!(magic = %parts[0], "unknown protocol magic, falling back to basic");
        BASIC_PROTOCOL_MAGIC.to_string()
    };
    let languages = parts[1].clone();
    let master_name = parts[2].clone();

    writer.send(CONTROL, &format!("{}:{}", control::AGREEMENT, identity.name))?;

    if identity.flags & FLAG_AUTHENTICATION_REQUIRED != 0 {
        let message = reader.read_message_timeout(identity.auth_timeout, || Ok(()))?;
        if message.channel != CONTROL {
            return Err(ProtocolError::Protocol(
                "expected authentication on the control channel".to_string(),
            ));
        }
        // credentials are matched verbatim, without trimming
        let parts: Vec<&str> = message.payload.split(':').collect();
        if parts[0] != control::AUTHENTICATE || parts.len() < 3 {
            let _ = writer.send(
                CONTROL,
                &format!("{}:authentication expected", control::DISAGREEMENT),
            );
            return Err(ProtocolError::AuthenticationFailed(
                "authentication expected".to_string(),
            ));
        }
        let (user, password) = identity.credentials.clone().ok_or_else(|| {
            ProtocolError::Handshake("slave requires authentication but has no credentials".to_string())
        })?;
        // user name matches case-insensitively, password exactly
        let password_sent = parts[2..].join(":");
        if !parts[1].eq_ignore_ascii_case(&user) || password_sent != password {
            let _ = writer.send(
                CONTROL,
                &format!("{}:authentication failed", control::DISAGREEMENT),
            );
            return Err(ProtocolError::AuthenticationFailed(format!(
                "bad credentials for user {:?}",
                parts[1]
            )));
        }
        writer.send(CONTROL, control::AGREEMENT)?;
        debug!(master = %master_name, "master authenticated");
    }

    Ok(SlaveHandshake {
        master_name,
        languages,
        protocol_magic,
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    fn pair() -> (
        MessageReader<UnixStream>,
        MessageWriter<UnixStream>,
        MessageReader<UnixStream>,
        MessageWriter<UnixStream>,
    ) {
        let (left, right) = UnixStream::pair().unwrap();
        (
            MessageReader::new(left.try_clone().unwrap()),
            MessageWriter::new(left),
            MessageReader::new(right.try_clone().unwrap()),
            MessageWriter::new(right),
        )
    }

    #[test]
    fn successful_handshake() {
        let (mut sr, mut sw, mut mr, mut mw) = pair();

        let slave = thread::spawn(move || {
            handshake_slave(&mut sr, &mut sw, &SlaveIdentity::new("test-device")).unwrap()
        });

        let master =
            handshake_master(&mut mr, &mut mw, &MasterHandshakeConfig::default()).unwrap();
        let slave = slave.join().unwrap();

        assert_eq!(master.slave_name, "test-device");
        assert_eq!(master.protocol_magic, BASIC_PROTOCOL_MAGIC);
        assert_eq!(master.encoding, "utf-8");
        assert_eq!(slave.master_name, "opdi-master");
        assert_eq!(slave.languages, "en");
    }

    #[test]
    fn master_requiring_encryption_is_refused() {
        let (mut sr, mut sw, mut mr, mut mw) = pair();

        let slave = thread::spawn(move || {
            handshake_slave(&mut sr, &mut sw, &SlaveIdentity::new("dev"))
        });

        let config = MasterHandshakeConfig {
            flags: FLAG_ENCRYPTION_REQUIRED,
            ..MasterHandshakeConfig::default()
        };
        let master = handshake_master(&mut mr, &mut mw, &config);
        assert!(master.is_err());
        assert!(matches!(
            slave.join().unwrap(),
            Err(ProtocolError::Handshake(_))
        ));
    }

    #[test]
    fn authentication_roundtrip() {
        let (mut sr, mut sw, mut mr, mut mw) = pair();

        let slave = thread::spawn(move || {
            let mut identity = SlaveIdentity::new("secure-device");
            identity.flags = FLAG_AUTHENTICATION_REQUIRED;
            identity.credentials = Some(("Admin".to_string(), "secret".to_string()));
            handshake_slave(&mut sr, &mut sw, &identity)
        });

        let config = MasterHandshakeConfig {
            // user name is matched case-insensitively
            credentials: Some(("admin".to_string(), "secret".to_string())),
            ..MasterHandshakeConfig::default()
        };
        let master = handshake_master(&mut mr, &mut mw, &config).unwrap();
        assert_eq!(master.slave_name, "secure-device");
        assert!(slave.join().unwrap().is_ok());
    }

    #[test]
    fn wrong_password_rejected() {
        let (mut sr, mut sw, mut mr, mut mw) = pair();

        let slave = thread::spawn(move || {
            let mut identity = SlaveIdentity::new("secure-device");
            identity.flags = FLAG_AUTHENTICATION_REQUIRED;
            identity.credentials = Some(("admin".to_string(), "secret".to_string()));
            handshake_slave(&mut sr, &mut sw, &identity)
        });

        let config = MasterHandshakeConfig {
            credentials: Some(("admin".to_string(), "wrong".to_string())),
            ..MasterHandshakeConfig::default()
        };
        let master = handshake_master(&mut mr, &mut mw, &config);
        assert!(matches!(
            master,
            Err(ProtocolError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            slave.join().unwrap(),
            Err(ProtocolError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn missing_credentials_fail_before_sending() {
        let (mut sr, mut sw, mut mr, mut mw) = pair();

        let slave = thread::spawn(move || {
            let mut identity = SlaveIdentity::new("secure-device");
            identity.flags = FLAG_AUTHENTICATION_REQUIRED;
            identity.credentials = Some(("admin".to_string(), "secret".to_string()));
            // the master bails out, so this side times out or disconnects
            let _ = handshake_slave(&mut sr, &mut sw, &identity);
        });

        let master = handshake_master(&mut mr, &mut mw, &MasterHandshakeConfig::default());
        assert!(matches!(
            master,
            Err(ProtocolError::AuthenticationFailed(_))
        ));
        drop((mr, mw));
        slave.join().unwrap();
    }

    #[test]
    fn version_mismatch_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw = MessageWriter::new(left.try_clone().unwrap());
        raw.send(CONTROL, "OPDI:9.9:0:").unwrap();

        let mut reader = MessageReader::new(right.try_clone().unwrap());
        let mut writer = MessageWriter::new(right);
        let result = handshake_slave(&mut reader, &mut writer, &SlaveIdentity::new("dev"));
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
    }

    #[test]
    fn unknown_protocol_magic_falls_back_to_basic() {
        let (mut sr, mut sw, _mr, mut mw) = pair();

        let slave = thread::spawn(move || {
            handshake_slave(&mut sr, &mut sw, &SlaveIdentity::new("dev"))
        });

        mw.send(CONTROL, "OPDI:0.1:0:").unwrap();
        // skip reading the reply; select a fantasy protocol
        mw.send(CONTROL, "XP:en:master").unwrap();

        let result = slave.join().unwrap().unwrap();
        assert_eq!(result.protocol_magic, BASIC_PROTOCOL_MAGIC);
        assert_eq!(result.master_name, "master");
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = MasterHandshakeConfig {
            credentials: Some(("admin".to_string(), "super-secret".to_string())),
            ..MasterHandshakeConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("super-secret"));

        let mut identity = SlaveIdentity::new("dev");
        identity.credentials = Some(("admin".to_string(), "hunter2".to_string()));
        let debug = format!("{identity:?}");
        assert!(!debug.contains("hunter2"));
    }
}
