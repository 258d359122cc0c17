use crate::base::{flags, ChangeSource, PortBase, PortDirCaps};
use crate::error::{PortError, PortErrorKind, Result};

/// Analog port mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogMode {
    Input = 0,
    Output = 1,
}

impl AnalogMode {
    pub fn as_wire(self) -> &'static str {
        match self {
            AnalogMode::Input => "0",
            AnalogMode::Output => "1",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "0" => Some(AnalogMode::Input),
            "1" => Some(AnalogMode::Output),
            _ => None,
        }
    }
}

/// Analog reference source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogReference {
    Internal = 0,
    External = 1,
}

impl AnalogReference {
    pub fn as_wire(self) -> &'static str {
        match self {
            AnalogReference::Internal => "0",
            AnalogReference::External => "1",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "0" => Some(AnalogReference::Internal),
            "1" => Some(AnalogReference::External),
            _ => None,
        }
    }
}

/// Valid analog resolutions in bits.
pub const MIN_RESOLUTION: u8 = 8;
pub const MAX_RESOLUTION: u8 = 12;

fn resolution_flag(resolution: u8) -> Option<i32> {
    match resolution {
        8 => Some(flags::ANALOG_RESOLUTION_8),
        9 => Some(flags::ANALOG_RESOLUTION_9),
        10 => Some(flags::ANALOG_RESOLUTION_10),
        11 => Some(flags::ANALOG_RESOLUTION_11),
        12 => Some(flags::ANALOG_RESOLUTION_12),
        _ => None,
    }
}

/// An analog port with a configurable resolution and reference.
#[derive(Debug)]
pub struct AnalogPort {
    base: PortBase,
    mode: AnalogMode,
    resolution: u8,
    reference: AnalogReference,
    value: i32,
}

impl AnalogPort {
    /// Create an analog port. The initial resolution is the lowest one the
    /// flags advertise (0 if none — relative values then read as 0).
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        dircaps: PortDirCaps,
        port_flags: i32,
    ) -> Self {
        let base = PortBase::new(id, label, dircaps, port_flags);
        let resolution = (MIN_RESOLUTION..=MAX_RESOLUTION)
            .find(|&r| resolution_flag(r).is_some_and(|flag| base.has_flag(flag)))
            .unwrap_or(0);
        let mode = if dircaps == PortDirCaps::Output {
            AnalogMode::Output
        } else {
            AnalogMode::Input
        };
        Self {
            base,
            mode,
            resolution,
            reference: AnalogReference::Internal,
            value: 0,
        }
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    fn max_value(&self) -> i32 {
        if self.resolution == 0 {
            0
        } else {
            (1i32 << self.resolution) - 1
        }
    }

    /// Set the port mode. Switching to output resets the value to 0.
    pub fn set_mode(&mut self, mode: AnalogMode, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        let id = self.base.id();
        match mode {
            AnalogMode::Input if self.base.dircaps() == PortDirCaps::Output => {
                return Err(PortError::new(
                    PortErrorKind::UnsupportedMode,
                    id,
                    "cannot configure output-only analog port for input",
                ));
            }
            AnalogMode::Output if self.base.dircaps() == PortDirCaps::Input => {
                return Err(PortError::new(
                    PortErrorKind::UnsupportedMode,
                    id,
                    "cannot configure input-only analog port for output",
                ));
            }
            _ => {}
        }

        let changed = self.mode != mode;
        if changed && mode == AnalogMode::Output {
            self.value = 0;
        }
        self.mode = mode;
        self.base.note_change(changed);
        Ok(())
    }

    /// Set the resolution in bits. Each value is gated by the corresponding
    /// `RESOLUTION_n` flag.
    pub fn set_resolution(&mut self, resolution: u8, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        let flag = resolution_flag(resolution).ok_or_else(|| {
            PortError::new(
                PortErrorKind::UnsupportedResolution,
                self.base.id(),
                format!("resolution {resolution} outside {MIN_RESOLUTION}..={MAX_RESOLUTION} bits"),
            )
        })?;
        if !self.base.has_flag(flag) {
            return Err(PortError::new(
                PortErrorKind::UnsupportedResolution,
                self.base.id(),
                format!("resolution {resolution} not advertised by port flags"),
            ));
        }

        let changed = self.resolution != resolution;
        self.resolution = resolution;
        // keep the stored value representable at the new resolution
        self.value = self.value.clamp(0, self.max_value());
        self.base.note_change(changed);
        Ok(())
    }

    /// Set the reference source. Requires the `CAN_CHANGE_REF` flag.
    pub fn set_reference(&mut self, reference: AnalogReference, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        if !self.base.has_flag(flags::ANALOG_CAN_CHANGE_REFERENCE) {
            return Err(PortError::new(
                PortErrorKind::UnsupportedReference,
                self.base.id(),
                "port cannot change its reference",
            ));
        }

        let changed = self.reference != reference;
        self.reference = reference;
        self.base.note_change(changed);
        Ok(())
    }

    /// Set the raw value, clamped to `[0, 2^resolution - 1]`.
    ///
    /// External writes require output mode; internal writes model the device
    /// updating its own input reading.
    pub fn set_value(&mut self, value: i32, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        if source == ChangeSource::External && self.mode == AnalogMode::Input {
            return Err(PortError::new(
                PortErrorKind::UnsupportedMode,
                self.base.id(),
                "cannot set value on analog port in input mode",
            ));
        }

        let clamped = value.clamp(0, self.max_value());
        let changed = self.value != clamped;
        self.value = clamped;
        self.base.note_change(changed);
        Ok(())
    }

    /// The value as a fraction of the resolution range, in `[0, 1]`.
    pub fn relative_value(&self) -> f64 {
        let max = self.max_value();
        if max == 0 {
            0.0
        } else {
            self.value as f64 / max as f64
        }
    }

    /// Set the value from a `[0, 1]` fraction.
    pub fn set_relative_value(&mut self, relative: f64, source: ChangeSource) -> Result<()> {
        let scaled = (relative * self.max_value() as f64).round() as i32;
        self.set_value(scaled, source)
    }

    pub fn mode(&self) -> AnalogMode {
        self.mode
    }

    pub fn resolution(&self) -> u8 {
        self.resolution
    }

    pub fn reference(&self) -> AnalogReference {
        self.reference
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// Current state, gated on the port's error condition.
    pub fn state(&self) -> Result<(AnalogMode, AnalogReference, u8, i32)> {
        self.base.check_value_available()?;
        Ok((self.mode, self.reference, self.resolution, self.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_port(extra_flags: i32) -> AnalogPort {
        AnalogPort::new(
            "aout",
            "Analog Out",
            PortDirCaps::Output,
            flags::ANALOG_RESOLUTION_8 | extra_flags,
        )
    }

    #[test]
    fn value_clamps_to_resolution_range() {
        let mut port = output_port(0);
        assert_eq!(port.resolution(), 8);

        port.set_value(-5, ChangeSource::External).unwrap();
        assert_eq!(port.value(), 0);

        port.set_value(1000, ChangeSource::External).unwrap();
        assert_eq!(port.value(), 255);

        port.set_value(128, ChangeSource::External).unwrap();
        assert_eq!(port.value(), 128);
    }

    #[test]
    fn external_value_write_requires_output_mode() {
        let mut port = AnalogPort::new(
            "ain",
            "Analog In",
            PortDirCaps::Input,
            flags::ANALOG_RESOLUTION_10,
        );
        let err = port.set_value(10, ChangeSource::External).unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedMode);

        // the device itself may update an input reading
        port.set_value(10, ChangeSource::Internal).unwrap();
        assert_eq!(port.value(), 10);
    }

    #[test]
    fn resolution_gated_by_flags() {
        let mut port = output_port(flags::ANALOG_RESOLUTION_10);

        port.set_resolution(10, ChangeSource::External).unwrap();
        assert_eq!(port.resolution(), 10);

        let err = port.set_resolution(12, ChangeSource::External).unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedResolution);

        let err = port.set_resolution(7, ChangeSource::External).unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedResolution);
    }

    #[test]
    fn shrinking_resolution_clamps_value() {
        let mut port = output_port(flags::ANALOG_RESOLUTION_10);
        port.set_resolution(10, ChangeSource::External).unwrap();
        port.set_value(1000, ChangeSource::External).unwrap();
        assert_eq!(port.value(), 1000);

        port.set_resolution(8, ChangeSource::External).unwrap();
        assert_eq!(port.value(), 255);
    }

    #[test]
    fn reference_change_requires_flag() {
        let mut port = output_port(0);
        let err = port
            .set_reference(AnalogReference::External, ChangeSource::External)
            .unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedReference);

        let mut port = output_port(flags::ANALOG_CAN_CHANGE_REFERENCE);
        port.set_reference(AnalogReference::External, ChangeSource::External)
            .unwrap();
        assert_eq!(port.reference(), AnalogReference::External);
    }

    #[test]
    fn mode_constrained_by_dircaps() {
        let mut port = AnalogPort::new(
            "ain",
            "Analog In",
            PortDirCaps::Input,
            flags::ANALOG_RESOLUTION_8,
        );
        let err = port
            .set_mode(AnalogMode::Output, ChangeSource::External)
            .unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedMode);

        let mut port = output_port(0);
        let err = port
            .set_mode(AnalogMode::Input, ChangeSource::External)
            .unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedMode);
    }

    #[test]
    fn relative_value_uses_resolution_denominator() {
        let mut port = output_port(0);
        port.set_value(255, ChangeSource::External).unwrap();
        assert!((port.relative_value() - 1.0).abs() < f64::EPSILON);

        port.set_relative_value(0.5, ChangeSource::External).unwrap();
        assert_eq!(port.value(), 128); // 0.5 * 255 rounds to 128

        // zero resolution reads as 0
        let port = AnalogPort::new("a", "A", PortDirCaps::Output, 0);
        assert_eq!(port.resolution(), 0);
        assert_eq!(port.relative_value(), 0.0);
    }

    #[test]
    fn switching_to_output_resets_value() {
        let mut port = AnalogPort::new(
            "abidi",
            "Analog Bidi",
            PortDirCaps::Bidirectional,
            flags::ANALOG_RESOLUTION_8,
        );
        port.set_value(42, ChangeSource::Internal).unwrap();
        port.set_mode(AnalogMode::Output, ChangeSource::External)
            .unwrap();
        assert_eq!(port.value(), 0);
    }
}
