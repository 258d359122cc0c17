//! Wire descriptors for the port-info exchange.
//!
//! A port-info reply starts with a magic token identifying the port type,
//! followed by `:`-separated fields. The slave serializes descriptors from
//! its live ports; the master parses them into [`PortDescriptor`] values.

use crate::base::PortDirCaps;
use crate::error::{PortError, PortErrorKind, Result};

/// Port-info magic tokens.
pub mod magic {
    pub const DIGITAL: &str = "DP";
    pub const ANALOG: &str = "AP";
    pub const SELECT: &str = "SLP";
    pub const DIAL: &str = "DL";
    pub const STREAMING: &str = "SP";
}

/// A decoded port description as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortDescriptor {
    /// `DP:<id>:<label>:<dircaps>:<flags>`
    Digital {
        id: String,
        label: String,
        dircaps: PortDirCaps,
        flags: i32,
    },
    /// `AP:<id>:<label>:<dircaps>:<flags>`
    Analog {
        id: String,
        label: String,
        dircaps: PortDirCaps,
        flags: i32,
    },
    /// `SLP:<id>:<label>:<count>:<flags>`; labels are fetched one by one
    /// after the descriptor itself arrives.
    Select {
        id: String,
        label: String,
        count: u16,
        flags: i32,
        labels: Vec<String>,
    },
    /// `DL:<id>:<label>:<min>:<max>:<step>:<flags>`
    Dial {
        id: String,
        label: String,
        min: i64,
        max: i64,
        step: i64,
        flags: i32,
    },
    /// `SP:<id>:<label>:<driver-id>:<flags>`
    Streaming {
        id: String,
        label: String,
        driver_id: String,
        flags: i32,
    },
}

impl PortDescriptor {
    /// Parse a descriptor from its payload parts.
    ///
    /// Returns `Ok(None)` for an unknown magic — the caller must treat that
    /// as "port type unsupported", not as a fatal error.
    pub fn parse(parts: &[&str]) -> Result<Option<PortDescriptor>> {
        let magic = parts.first().copied().unwrap_or_default();
        let descriptor = match magic {
            magic::DIGITAL | magic::ANALOG => {
                check_part_count(magic, parts, 5)?;
                let dircaps = PortDirCaps::from_wire(parts[3]).ok_or_else(|| {
                    invalid(parts[1], format!("bad direction capability {:?}", parts[3]))
                })?;
                let flags = parse_i32(parts[1], "flags", parts[4])?;
                if magic == magic::DIGITAL {
                    PortDescriptor::Digital {
                        id: parts[1].to_string(),
                        label: parts[2].to_string(),
                        dircaps,
                        flags,
                    }
                } else {
                    PortDescriptor::Analog {
                        id: parts[1].to_string(),
                        label: parts[2].to_string(),
                        dircaps,
                        flags,
                    }
                }
            }
            magic::SELECT => {
                check_part_count(magic, parts, 5)?;
                let count = parse_i32(parts[1], "position count", parts[3])?;
                let count = u16::try_from(count)
                    .map_err(|_| invalid(parts[1], format!("position count {count} out of range")))?;
                PortDescriptor::Select {
                    id: parts[1].to_string(),
                    label: parts[2].to_string(),
                    count,
                    flags: parse_i32(parts[1], "flags", parts[4])?,
                    labels: Vec::new(),
                }
            }
            magic::DIAL => {
                check_part_count(magic, parts, 7)?;
                PortDescriptor::Dial {
                    id: parts[1].to_string(),
                    label: parts[2].to_string(),
                    min: parse_i64(parts[1], "minimum", parts[3])?,
                    max: parse_i64(parts[1], "maximum", parts[4])?,
                    step: parse_i64(parts[1], "step", parts[5])?,
                    flags: parse_i32(parts[1], "flags", parts[6])?,
                }
            }
            magic::STREAMING => {
                check_part_count(magic, parts, 5)?;
                PortDescriptor::Streaming {
                    id: parts[1].to_string(),
                    label: parts[2].to_string(),
                    driver_id: parts[3].to_string(),
                    flags: parse_i32(parts[1], "flags", parts[4])?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(descriptor))
    }

    /// Serialize into the payload form the slave sends.
    pub fn serialize(&self) -> String {
        match self {
            PortDescriptor::Digital {
                id,
                label,
                dircaps,
                flags,
            } => format!("{}:{id}:{label}:{}:{flags}", magic::DIGITAL, dircaps.as_wire()),
            PortDescriptor::Analog {
                id,
                label,
                dircaps,
                flags,
            } => format!("{}:{id}:{label}:{}:{flags}", magic::ANALOG, dircaps.as_wire()),
            PortDescriptor::Select {
                id,
                label,
                count,
                flags,
                ..
            } => format!("{}:{id}:{label}:{count}:{flags}", magic::SELECT),
            PortDescriptor::Dial {
                id,
                label,
                min,
                max,
                step,
                flags,
            } => format!("{}:{id}:{label}:{min}:{max}:{step}:{flags}", magic::DIAL),
            PortDescriptor::Streaming {
                id,
                label,
                driver_id,
                flags,
            } => format!("{}:{id}:{label}:{driver_id}:{flags}", magic::STREAMING),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            PortDescriptor::Digital { id, .. }
            | PortDescriptor::Analog { id, .. }
            | PortDescriptor::Select { id, .. }
            | PortDescriptor::Dial { id, .. }
            | PortDescriptor::Streaming { id, .. } => id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            PortDescriptor::Digital { label, .. }
            | PortDescriptor::Analog { label, .. }
            | PortDescriptor::Select { label, .. }
            | PortDescriptor::Dial { label, .. }
            | PortDescriptor::Streaming { label, .. } => label,
        }
    }

    pub fn flags(&self) -> i32 {
        match self {
            PortDescriptor::Digital { flags, .. }
            | PortDescriptor::Analog { flags, .. }
            | PortDescriptor::Select { flags, .. }
            | PortDescriptor::Dial { flags, .. }
            | PortDescriptor::Streaming { flags, .. } => *flags,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PortDescriptor::Digital { .. } => "digital",
            PortDescriptor::Analog { .. } => "analog",
            PortDescriptor::Select { .. } => "select",
            PortDescriptor::Dial { .. } => "dial",
            PortDescriptor::Streaming { .. } => "streaming",
        }
    }

    /// Whether the readonly flag bit is set.
    pub fn readonly(&self) -> bool {
        (self.flags() & crate::base::flags::READONLY) != 0
    }
}

fn check_part_count(magic: &str, parts: &[&str], expected: usize) -> Result<()> {
    if parts.len() != expected {
        return Err(PortError::new(
            PortErrorKind::InvalidDescriptor,
            parts.get(1).copied().unwrap_or("<unknown>"),
            format!(
                "{magic} descriptor has {} parts, expected {expected}",
                parts.len()
            ),
        ));
    }
    Ok(())
}

fn invalid(id: &str, reason: String) -> PortError {
    PortError::new(PortErrorKind::InvalidDescriptor, id, reason)
}

fn parse_i32(id: &str, field: &str, value: &str) -> Result<i32> {
    value
        .parse::<i32>()
        .map_err(|_| invalid(id, format!("{field} is not a number: {value:?}")))
}

fn parse_i64(id: &str, field: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| invalid(id, format!("{field} is not a number: {value:?}")))
}
