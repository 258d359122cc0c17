//! Typed I/O port model for OPDI devices.
//!
//! A port is an addressable endpoint on a device: digital (two-state),
//! analog (valued, with resolution and reference), select (position in a
//! labelled list), dial (numeric range with a step), or streaming (opaque
//! byte data over a bound channel). Every mutation revalidates against the
//! port's direction capabilities and flags before any state changes, and
//! feeds the refresh/error bookkeeping the protocol layer relies on.

pub mod analog;
pub mod base;
pub mod descriptor;
pub mod dial;
pub mod digital;
pub mod error;
pub mod group;
pub mod info;
pub mod select;
pub mod streaming;

pub use analog::{AnalogMode, AnalogPort, AnalogReference, MAX_RESOLUTION, MIN_RESOLUTION};
pub use base::{flags, ChangeSource, ErrorState, PortBase, PortDirCaps, RefreshMode};
pub use descriptor::PortDescriptor;
pub use dial::DialPort;
pub use digital::{DigitalLine, DigitalMode, DigitalPort};
pub use error::{PortError, PortErrorKind, Result};
pub use group::{PortGroup, PortGroups};
pub use select::{SelectPort, MAX_SELECT_ITEMS};
pub use streaming::{StreamingDriver, StreamingPort};

/// A device port of any type.
///
/// The variant is fixed at construction; behaviour differences between port
/// types live in the variant structs, not in an inheritance chain.
#[derive(Debug)]
pub enum Port {
    Digital(DigitalPort),
    Analog(AnalogPort),
    Select(SelectPort),
    Dial(DialPort),
    Streaming(StreamingPort),
}

impl Port {
    pub fn base(&self) -> &PortBase {
        match self {
            Port::Digital(p) => p.base(),
            Port::Analog(p) => p.base(),
            Port::Select(p) => p.base(),
            Port::Dial(p) => p.base(),
            Port::Streaming(p) => p.base(),
        }
    }

    pub fn base_mut(&mut self) -> &mut PortBase {
        match self {
            Port::Digital(p) => p.base_mut(),
            Port::Analog(p) => p.base_mut(),
            Port::Select(p) => p.base_mut(),
            Port::Dial(p) => p.base_mut(),
            Port::Streaming(p) => p.base_mut(),
        }
    }

    pub fn id(&self) -> &str {
        self.base().id()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Port::Digital(_) => "digital",
            Port::Analog(_) => "analog",
            Port::Select(_) => "select",
            Port::Dial(_) => "dial",
            Port::Streaming(_) => "streaming",
        }
    }

    /// Hook invoked once before the device starts serving.
    pub fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// The wire descriptor advertising this port.
    pub fn descriptor(&self) -> PortDescriptor {
        match self {
            Port::Digital(p) => PortDescriptor::Digital {
                id: p.base().id().to_string(),
                label: p.base().label().to_string(),
                dircaps: p.base().dircaps(),
                flags: p.base().flags(),
            },
            Port::Analog(p) => PortDescriptor::Analog {
                id: p.base().id().to_string(),
                label: p.base().label().to_string(),
                dircaps: p.base().dircaps(),
                flags: p.base().flags(),
            },
            Port::Select(p) => PortDescriptor::Select {
                id: p.base().id().to_string(),
                label: p.base().label().to_string(),
                count: p.item_count(),
                flags: p.base().flags(),
                labels: Vec::new(),
            },
            Port::Dial(p) => PortDescriptor::Dial {
                id: p.base().id().to_string(),
                label: p.base().label().to_string(),
                min: p.min(),
                max: p.max(),
                step: p.step(),
                flags: p.base().flags(),
            },
            Port::Streaming(p) => PortDescriptor::Streaming {
                id: p.base().id().to_string(),
                label: p.base().label().to_string(),
                driver_id: p.driver_id().to_string(),
                flags: p.base().flags(),
            },
        }
    }
}

impl From<DigitalPort> for Port {
    fn from(port: DigitalPort) -> Self {
        Port::Digital(port)
    }
}

impl From<AnalogPort> for Port {
    fn from(port: AnalogPort) -> Self {
        Port::Analog(port)
    }
}

impl From<SelectPort> for Port {
    fn from(port: SelectPort) -> Self {
        Port::Select(port)
    }
}

impl From<DialPort> for Port {
    fn from(port: DialPort) -> Self {
        Port::Dial(port)
    }
}

impl From<StreamingPort> for Port {
    fn from(port: StreamingPort) -> Self {
        Port::Streaming(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_reflects_port_state() {
        let port: Port = DigitalPort::new(
            "door",
            "Door Contact",
            PortDirCaps::Input,
            flags::DIGITAL_HAS_PULLUP,
        )
        .into();

        match port.descriptor() {
            PortDescriptor::Digital {
                id,
                dircaps,
                flags: f,
                ..
            } => {
                assert_eq!(id, "door");
                assert_eq!(dircaps, PortDirCaps::Input);
                assert_eq!(f, flags::DIGITAL_HAS_PULLUP);
            }
            other => panic!("wrong descriptor: {other:?}"),
        }
    }

    #[test]
    fn readonly_port_advertises_readonly_flag() {
        let mut digital = DigitalPort::new("d", "D", PortDirCaps::Output, 0);
        digital.base_mut().set_readonly(true);
        let port: Port = digital.into();
        assert!(port.descriptor().readonly());
    }

    #[test]
    fn type_names() {
        let port: Port = DialPort::new("v", "V", 0, 0, 10, 1).unwrap().into();
        assert_eq!(port.type_name(), "dial");
        assert_eq!(port.id(), "v");
    }
}
