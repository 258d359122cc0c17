use crate::base::{ChangeSource, PortBase, PortDirCaps};
use crate::error::{PortError, PortErrorKind, Result};

/// A dial port: a numeric position between a minimum and a maximum, moving in
/// fixed steps. Think volume knobs and sliders.
#[derive(Debug)]
pub struct DialPort {
    base: PortBase,
    min: i64,
    max: i64,
    step: i64,
    position: i64,
}

impl DialPort {
    /// Create a dial port. `min` must be strictly less than `max` and `step`
    /// must be positive. The position starts at `min`.
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        port_flags: i32,
        min: i64,
        max: i64,
        step: i64,
    ) -> Result<Self> {
        let id = id.into();
        if min >= max {
            return Err(PortError::new(
                PortErrorKind::InvalidRange,
                &id,
                format!("minimum {min} must be less than maximum {max}"),
            ));
        }
        if step <= 0 {
            return Err(PortError::new(
                PortErrorKind::InvalidRange,
                &id,
                format!("step {step} must be positive"),
            ));
        }
        Ok(Self {
            base: PortBase::new(id, label, PortDirCaps::Output, port_flags),
            min,
            max,
            step,
            position: min,
        })
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    /// Set the position. Values outside `[min, max]` are rejected; in-range
    /// values snap down to the nearest step boundary counted from `min`.
    ///
    /// The snapped value is also what change detection compares against (the
    /// reference implementation compared the unrounded request, which made
    /// refresh bookkeeping disagree with the stored state).
    pub fn set_position(&mut self, position: i64, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        if position < self.min || position > self.max {
            return Err(PortError::new(
                PortErrorKind::PositionOutOfRange,
                self.base.id(),
                format!(
                    "position {position} outside [{}, {}]",
                    self.min, self.max
                ),
            ));
        }

        let snapped = position - (position - self.min).rem_euclid(self.step);
        let changed = self.position != snapped;
        self.position = snapped;
        self.base.note_change(changed);
        Ok(())
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    /// Current position, gated on the port's error condition.
    pub fn state(&self) -> Result<i64> {
        self.base.check_value_available()?;
        Ok(self.position)
    }
}
