use crate::base::{ChangeSource, PortBase, PortDirCaps};
use crate::error::{PortError, PortErrorKind, Result};

/// Maximum number of items a select port may carry.
pub const MAX_SELECT_ITEMS: usize = 65535;

/// A select port: a named list of positions, one of which is current.
#[derive(Debug)]
pub struct SelectPort {
    base: PortBase,
    items: Vec<String>,
    position: u16,
}

impl SelectPort {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        port_flags: i32,
        items: Vec<String>,
    ) -> Result<Self> {
        let id = id.into();
        check_item_count(&id, &items)?;
        Ok(Self {
            // select ports are always output from the device's perspective
            base: PortBase::new(id, label, PortDirCaps::Output, port_flags),
            items,
            position: 0,
        })
    }

    pub fn base(&self) -> &PortBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PortBase {
        &mut self.base
    }

    pub fn item_count(&self) -> u16 {
        self.items.len() as u16
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Replace the item list. The old list is dropped; the position resets
    /// to 0.
    pub fn set_items(&mut self, items: Vec<String>) -> Result<()> {
        check_item_count(self.base.id(), &items)?;
        self.items = items;
        self.position = 0;
        self.base.note_change(true);
        Ok(())
    }

    /// The label at a position. Valid positions for label queries are
    /// `0..count`.
    pub fn label_at(&self, position: u16) -> Result<&str> {
        self.items.get(position as usize).map(String::as_str).ok_or_else(|| {
            PortError::new(
                PortErrorKind::PositionOutOfRange,
                self.base.id(),
                format!("no label at position {position} (count {})", self.items.len()),
            )
        })
    }

    /// Set the current position.
    ///
    /// The valid range is `0..=count` — the upper bound is inclusive, a quirk
    /// inherited from the reference implementation and pinned by tests.
    pub fn set_position(&mut self, position: u16, source: ChangeSource) -> Result<()> {
        self.base.check_writable(source)?;
        if position as usize > self.items.len() {
            return Err(PortError::new(
                PortErrorKind::PositionOutOfRange,
                self.base.id(),
                format!(
                    "position {position} exceeds item count {}",
                    self.items.len()
                ),
            ));
        }

        let changed = self.position != position;
        self.position = position;
        self.base.note_change(changed);
        Ok(())
    }

    pub fn position(&self) -> u16 {
        self.position
    }

    /// Current position, gated on the port's error condition.
    pub fn state(&self) -> Result<u16> {
        self.base.check_value_available()?;
        Ok(self.position)
    }
}

fn check_item_count(id: &str, items: &[String]) -> Result<()> {
    if items.len() > MAX_SELECT_ITEMS {
        return Err(PortError::new(
            PortErrorKind::TooManyItems,
            id,
            format!("{} items exceed the maximum of {MAX_SELECT_ITEMS}", items.len()),
        ));
    }
    Ok(())
}
