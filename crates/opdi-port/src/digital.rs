use crate::base::{flags, ChangeSource, PortBase, PortDirCaps};
use crate::error::{PortError, PortErrorKind, Result};

/// Digital port mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalMode {
    InputFloating = 0,
    InputPullup = 1,
    InputPulldown = 2,
    Output = 3,
}

impl DigitalMode {
    pub fn as_wire(self) -> &'static str {
        match self {
            DigitalMode::InputFloating => "0",
            DigitalMode::InputPullup => "1",
            DigitalMode::InputPulldown => "2",
            DigitalMode::Output => "3",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "0" => Some(DigitalMode::InputFloating),
            "1" => Some(DigitalMode::InputPullup),
            "2" => Some(DigitalMode::InputPulldown),
            "3" => Some(DigitalMode::Output),
            _ => None,
        }
    }

    pub fn is_input(self) -> bool {
        self != DigitalMode::Output
    }
}

/// Digital line state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalLine {
    Low = 0,
    High = 1,
}

impl DigitalLine {
    pub fn as_wire(self) -> &'static str {
        match self {
            DigitalLine::Low => "0",
            DigitalLine::High => "1",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "0" => Some(DigitalLine::Low),
            "1" => Some(DigitalLine::High),
            _ => None,
        }
    }
}

/// A digital port with two states (low and high).
#[derive(Debug)]
pub struct DigitalPort {
    base: PortBase,
    mode: DigitalMode,
    line: DigitalLine,
}

impl DigitalPort {
    /// Create a digital port. The initial mode follows the direction
    /// capabilities: output-only ports start in output mode, input-capable
    /// ports start floating (or with pullup when the port always pulls up).
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        dircaps: PortDirCaps,
        port_flags: i32,
    ) -> Self {
        let base = PortBase::new(id, label, dircaps, port_flags);
        let mode = if dircaps == PortDirCaps::Output {
            DigitalMode::Output
        } else if base.has_flag(flags::DIGITAL_PULLUP_ALWAYS) {
            DigitalMode::InputPullup
        } else {
            DigitalMode::InputFloating
        };
        Self {
            base,
            mode,
            line: DigitalLine::Low,
        }
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    pub fn has_pullup(&self) -> bool {
        self.base.has_flag(flags::DIGITAL_HAS_PULLUP)
            || self.base.has_flag(flags::DIGITAL_PULLUP_ALWAYS)
    }

    pub fn has_pulldown(&self) -> bool {
        self.base.has_flag(flags::DIGITAL_HAS_PULLDOWN)
            || self.base.has_flag(flags::DIGITAL_PULLDOWN_ALWAYS)
    }

    fn check_mode(&self, mode: DigitalMode) -> Result<()> {
        let id = self.base.id();
        match mode {
            DigitalMode::Output => {
                if self.base.dircaps() == PortDirCaps::Input {
                    return Err(PortError::new(
                        PortErrorKind::UnsupportedMode,
                        id,
                        "cannot configure input-only digital port for output",
                    ));
                }
            }
            _ => {
                if self.base.dircaps() == PortDirCaps::Output {
                    return Err(PortError::new(
                        PortErrorKind::UnsupportedMode,
                        id,
                        "cannot configure output-only digital port for input",
                    ));
                }
            }
        }
        if mode == DigitalMode::InputPullup && !self.has_pullup() {
            return Err(PortError::new(
                PortErrorKind::UnsupportedMode,
                id,
                "digital port has no pullup",
            ));
        }
        if mode == DigitalMode::InputPulldown && !self.has_pulldown() {
            return Err(PortError::new(
                PortErrorKind::UnsupportedMode,
                id,
                "digital port has no pulldown",
            ));
        }
        Ok(())
    }

    /// Set the port mode. Switching to output clears the line.
    pub fn set_mode(&mut self, mode: DigitalMode, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        self.check_mode(mode)?;

        let changed = self.mode != mode;
        if changed && mode == DigitalMode::Output {
            self.line = DigitalLine::Low;
        }
        self.mode = mode;
        self.base.note_change(changed);
        Ok(())
    }

    /// Set the line state. Only valid in output mode.
    pub fn set_line(&mut self, line: DigitalLine, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        if self.mode != DigitalMode::Output {
            return Err(PortError::new(
                PortErrorKind::UnsupportedMode,
                self.base.id(),
                "cannot set line on digital port not in output mode",
            ));
        }

        let changed = self.line != line;
        self.line = line;
        self.base.note_change(changed);
        Ok(())
    }

    pub fn mode(&self) -> DigitalMode {
        self.mode
    }

    pub fn line(&self) -> DigitalLine {
        self.line
    }

    /// Current state, gated on the port's error condition.
    pub fn state(&self) -> Result<(DigitalMode, DigitalLine)> {
        self.base.check_value_available()?;
        Ok((self.mode, self.line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ErrorState;

    fn input_port(port_flags: i32) -> DigitalPort {
        DigitalPort::new("din", "Digital In", PortDirCaps::Input, port_flags)
    }

    #[test]
    fn output_mode_on_input_only_port_fails() {
        let mut port = input_port(0);
        let err = port
            .set_mode(DigitalMode::Output, ChangeSource::External)
            .unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedMode);
        assert!(err.to_string().contains("din"));
    }

    #[test]
    fn input_modes_on_output_only_port_fail() {
        let mut port = DigitalPort::new("dout", "Digital Out", PortDirCaps::Output, 0);
        for mode in [
            DigitalMode::InputFloating,
            DigitalMode::InputPullup,
            DigitalMode::InputPulldown,
        ] {
            let err = port.set_mode(mode, ChangeSource::External).unwrap_err();
            assert_eq!(err.kind, PortErrorKind::UnsupportedMode);
        }
    }

    #[test]
    fn pullup_requires_flag() {
        let mut port = input_port(0);
        assert!(port
            .set_mode(DigitalMode::InputPullup, ChangeSource::External)
            .is_err());

        let mut port = input_port(flags::DIGITAL_HAS_PULLUP);
        assert!(port
            .set_mode(DigitalMode::InputPullup, ChangeSource::External)
            .is_ok());

        // PULLUP_ALWAYS counts as pullup capability
        let mut port = input_port(flags::DIGITAL_PULLUP_ALWAYS);
        assert!(port
            .set_mode(DigitalMode::InputPullup, ChangeSource::External)
            .is_ok());
    }

    #[test]
    fn pulldown_requires_flag() {
        let mut port = input_port(flags::DIGITAL_HAS_PULLUP);
        assert!(port
            .set_mode(DigitalMode::InputPulldown, ChangeSource::External)
            .is_err());

        let mut port = input_port(flags::DIGITAL_HAS_PULLDOWN);
        assert!(port
            .set_mode(DigitalMode::InputPulldown, ChangeSource::External)
            .is_ok());
    }

    #[test]
    fn pullup_always_sets_initial_mode() {
        let port = input_port(flags::DIGITAL_PULLUP_ALWAYS);
        assert_eq!(port.mode(), DigitalMode::InputPullup);

        let port = DigitalPort::new("d", "D", PortDirCaps::Output, 0);
        assert_eq!(port.mode(), DigitalMode::Output);
    }

    #[test]
    fn set_line_requires_output_mode() {
        let mut port = DigitalPort::new("d", "D", PortDirCaps::Bidirectional, 0);
        port.set_mode(DigitalMode::InputFloating, ChangeSource::External)
            .unwrap();
        let err = port
            .set_line(DigitalLine::High, ChangeSource::External)
            .unwrap_err();
        assert_eq!(err.kind, PortErrorKind::UnsupportedMode);

        port.set_mode(DigitalMode::Output, ChangeSource::External)
            .unwrap();
        port.set_line(DigitalLine::High, ChangeSource::External)
            .unwrap();
        assert_eq!(port.line(), DigitalLine::High);
    }

    #[test]
    fn switching_to_output_clears_line() {
        let mut port = DigitalPort::new("d", "D", PortDirCaps::Bidirectional, 0);
        port.set_mode(DigitalMode::Output, ChangeSource::External)
            .unwrap();
        port.set_line(DigitalLine::High, ChangeSource::External)
            .unwrap();

        port.set_mode(DigitalMode::InputFloating, ChangeSource::External)
            .unwrap();
        port.set_mode(DigitalMode::Output, ChangeSource::External)
            .unwrap();
        assert_eq!(port.line(), DigitalLine::Low);
    }

    #[test]
    fn failed_validation_leaves_state_untouched() {
        let mut port = input_port(0);
        let before = port.mode();
        let _ = port.set_mode(DigitalMode::Output, ChangeSource::External);
        assert_eq!(port.mode(), before);
    }

    #[test]
    fn state_gated_by_error() {
        let mut port = input_port(0);
        assert!(port.state().is_ok());
        port.base_mut().set_error(ErrorState::Unavailable);
        assert_eq!(
            port.state().unwrap_err().kind,
            PortErrorKind::ValueUnavailable
        );
    }

    #[test]
    fn readonly_port_rejects_external_set() {
        let mut port = DigitalPort::new("d", "D", PortDirCaps::Output, 0);
        port.base_mut().set_readonly(true);
        let err = port
            .set_line(DigitalLine::High, ChangeSource::External)
            .unwrap_err();
        assert_eq!(err.kind, PortErrorKind::AccessDenied);
        assert!(port
            .set_line(DigitalLine::High, ChangeSource::Internal)
            .is_ok());
    }

    #[test]
    fn wire_roundtrip() {
        for mode in [
            DigitalMode::InputFloating,
            DigitalMode::InputPullup,
            DigitalMode::InputPulldown,
            DigitalMode::Output,
        ] {
            assert_eq!(DigitalMode::from_wire(mode.as_wire()), Some(mode));
        }
        assert_eq!(DigitalMode::from_wire("4"), None);
        assert_eq!(DigitalLine::from_wire("1"), Some(DigitalLine::High));
    }
}
