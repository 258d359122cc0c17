use opdi_port::PortDescriptor;

use crate::error::{ProtocolError, Result};
use crate::tokens;

/// The ordered set of port descriptors a slave advertises.
///
/// Owned by the requesting protocol session and cached until a Reconfigure
/// message invalidates it.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    ports: Vec<PortDescriptor>,
}

impl DeviceCapabilities {
    pub fn new(ports: Vec<PortDescriptor>) -> Self {
        Self { ports }
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn find_port(&self, id: &str) -> Option<&PortDescriptor> {
        self.ports.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// Decode a `BDC` device-capabilities payload into its port ID list.
///
/// Empty ID tokens are skipped, not errors.
pub fn parse_port_id_list(payload: &str) -> Result<Vec<String>> {
    let parts: Vec<&str> = payload.split(':').collect();
    if parts.len() != 2 {
        return Err(ProtocolError::Protocol(format!(
            "device capabilities message has {} parts, expected 2",
            parts.len()
        )));
    }
    if parts[0] != tokens::DEVICE_CAPS {
        return Err(ProtocolError::Protocol(format!(
            "device capabilities message has wrong magic {:?}",
            parts[0]
        )));
    }
    Ok(parts[1]
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_list() {
        let ids = parse_port_id_list("BDC:door,window,vol").unwrap();
        assert_eq!(ids, vec!["door", "window", "vol"]);
    }

    #[test]
    fn skips_empty_ids() {
        let ids = parse_port_id_list("BDC:door,,vol").unwrap();
        assert_eq!(ids, vec!["door", "vol"]);
        assert!(parse_port_id_list("BDC:").unwrap().is_empty());
    }

    #[test]
    fn wrong_magic_rejected() {
        assert!(matches!(
            parse_port_id_list("XDC:door"),
            Err(ProtocolError::Protocol(_))
        ));
    }

    #[test]
    fn wrong_part_count_rejected() {
        assert!(matches!(
            parse_port_id_list("BDC:door:extra"),
            Err(ProtocolError::Protocol(_))
        ));
    }

    #[test]
    fn find_port_by_id() {
        let caps = DeviceCapabilities::new(vec![PortDescriptor::Digital {
            id: "door".into(),
            label: "Door".into(),
            dircaps: opdi_port::PortDirCaps::Input,
            flags: 0,
        }]);
        assert!(caps.find_port("door").is_some());
        assert!(caps.find_port("window").is_none());
        assert_eq!(caps.len(), 1);
    }
}
