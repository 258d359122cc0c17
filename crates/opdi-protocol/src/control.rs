//! Control-channel (channel 0) message grammar.
//!
//! Control messages are fire-and-forget: no reply is expected. The first
//! `:`-separated token selects the message kind. Unrecognised payloads (such
//! as the master's keepalive ping) are ignored by receivers but still count
//! as link activity.

/// Tear down the connection without reply.
pub const DISCONNECT: &str = "Dis";
/// The master must invalidate cached device capabilities.
pub const RECONFIGURE: &str = "Reconf";
/// Refresh the named ports (no IDs: refresh everything).
pub const REFRESH: &str = "Ref";
/// Free-text debug output for the peer's listener.
pub const DEBUG: &str = "Debug";
/// Error report with an optional numeric code and free text.
pub const ERROR: &str = "Err";

/// Positive acknowledgement in handshake and agreement exchanges.
pub const AGREEMENT: &str = "OK";
/// Negative acknowledgement.
pub const DISAGREEMENT: &str = "NOK";
/// Credential exchange during the handshake.
pub const AUTHENTICATE: &str = "Auth";

/// The master's keepalive payload. Any unrecognised control payload works;
/// this one is what we send.
pub const PING: &str = "ping";

/// A decoded control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Disconnect,
    Reconfigure,
    Debug(String),
    /// Port IDs to refresh; empty means refresh all.
    Refresh(Vec<String>),
    Error {
        code: u8,
        text: String,
    },
}

impl ControlMessage {
    /// Parse a control payload. Returns `None` for payloads that are not a
    /// recognised control message (they are ignored, not errors).
    pub fn parse(payload: &str) -> Option<ControlMessage> {
        let parts: Vec<&str> = payload.split(':').collect();
        match parts[0] {
            DISCONNECT => Some(ControlMessage::Disconnect),
            RECONFIGURE => Some(ControlMessage::Reconfigure),
            DEBUG => Some(ControlMessage::Debug(parts[1..].join(":"))),
            REFRESH => Some(ControlMessage::Refresh(
                parts[1..]
                    .iter()
                    .filter(|id| !id.is_empty())
                    .map(|id| id.to_string())
                    .collect(),
            )),
            ERROR => {
                let (code, text) = match parts.get(1).and_then(|c| c.parse::<u8>().ok()) {
                    Some(code) => (code, parts.get(2..).unwrap_or_default().join(":")),
                    None => (0, parts[1..].join(":")),
                };
                Some(ControlMessage::Error { code, text })
            }
            _ => None,
        }
    }

    /// Serialize back into a control payload.
    pub fn to_payload(&self) -> String {
        match self {
            ControlMessage::Disconnect => DISCONNECT.to_string(),
            ControlMessage::Reconfigure => RECONFIGURE.to_string(),
            ControlMessage::Debug(text) => format!("{DEBUG}:{text}"),
            ControlMessage::Refresh(ids) => {
                if ids.is_empty() {
                    REFRESH.to_string()
                } else {
                    format!("{REFRESH}:{}", ids.join(":"))
                }
            }
            ControlMessage::Error { code, text } => {
                if text.is_empty() {
                    format!("{ERROR}:{code}")
                } else {
                    format!("{ERROR}:{code}:{text}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_and_reconfigure() {
        assert_eq!(ControlMessage::parse("Dis"), Some(ControlMessage::Disconnect));
        assert_eq!(
            ControlMessage::parse("Reconf"),
            Some(ControlMessage::Reconfigure)
        );
    }

    #[test]
    fn debug_keeps_embedded_separators() {
        assert_eq!(
            ControlMessage::parse("Debug:state: a=1"),
            Some(ControlMessage::Debug("state: a=1".to_string()))
        );
    }

    #[test]
    fn refresh_with_and_without_ids() {
        assert_eq!(
            ControlMessage::parse("Ref:door:window"),
            Some(ControlMessage::Refresh(vec![
                "door".to_string(),
                "window".to_string()
            ]))
        );
        // no IDs (or only empty ones) means refresh everything
        assert_eq!(
            ControlMessage::parse("Ref"),
            Some(ControlMessage::Refresh(vec![]))
        );
        assert_eq!(
            ControlMessage::parse("Ref:"),
            Some(ControlMessage::Refresh(vec![]))
        );
    }

    #[test]
    fn error_with_code_and_text() {
        assert_eq!(
            ControlMessage::parse("Err:21:port not found"),
            Some(ControlMessage::Error {
                code: 21,
                text: "port not found".to_string()
            })
        );
        assert_eq!(
            ControlMessage::parse("Err"),
            Some(ControlMessage::Error {
                code: 0,
                text: String::new()
            })
        );
        // non-numeric code: everything after the magic is text
        assert_eq!(
            ControlMessage::parse("Err:boom"),
            Some(ControlMessage::Error {
                code: 0,
                text: "boom".to_string()
            })
        );
    }

    #[test]
    fn ping_is_not_a_control_message() {
        assert_eq!(ControlMessage::parse(PING), None);
    }

    #[test]
    fn payload_roundtrip() {
        for message in [
            ControlMessage::Disconnect,
            ControlMessage::Reconfigure,
            ControlMessage::Debug("hello".to_string()),
            ControlMessage::Refresh(vec!["a".to_string(), "b".to_string()]),
            ControlMessage::Refresh(vec![]),
            ControlMessage::Error {
                code: 18,
                text: "device error".to_string(),
            },
        ] {
            assert_eq!(ControlMessage::parse(&message.to_payload()), Some(message));
        }
    }
}
