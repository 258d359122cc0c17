use crate::error::{PortError, PortErrorKind, Result};
use crate::info::{format_properties, History};

/// Port flag constants, advertised in descriptors.
pub mod flags {
    pub const DIGITAL_HAS_PULLUP: i32 = 0x01;
    pub const DIGITAL_HAS_PULLDOWN: i32 = 0x02;
    pub const DIGITAL_PULLUP_ALWAYS: i32 = 0x04;
    pub const DIGITAL_PULLDOWN_ALWAYS: i32 = 0x08;

    pub const ANALOG_CAN_CHANGE_RESOLUTION: i32 = 0x01;
    pub const ANALOG_RESOLUTION_8: i32 = 0x02;
    pub const ANALOG_RESOLUTION_9: i32 = 0x04;
    pub const ANALOG_RESOLUTION_10: i32 = 0x08;
    pub const ANALOG_RESOLUTION_11: i32 = 0x10;
    pub const ANALOG_RESOLUTION_12: i32 = 0x20;
    pub const ANALOG_CAN_CHANGE_REFERENCE: i32 = 0x200;
    pub const ANALOG_REFERENCE_INTERNAL: i32 = 0x400;
    pub const ANALOG_REFERENCE_EXTERNAL: i32 = 0x800;

    pub const STREAMING_AUTOBIND: i32 = 0x01;

    /// Set on every port that cannot be written externally, regardless of the
    /// flags requested at construction.
    pub const READONLY: i32 = 0x4000;
}

/// Direction capabilities of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirCaps {
    /// Not yet known (descriptor not parsed).
    Unknown,
    /// Peripherals provide input to the device.
    Input,
    /// The device drives peripherals.
    Output,
    /// Either direction, one at a time.
    Bidirectional,
}

impl PortDirCaps {
    /// Wire representation (single digit).
    pub fn as_wire(self) -> &'static str {
        match self {
            PortDirCaps::Unknown => "?",
            PortDirCaps::Input => "0",
            PortDirCaps::Output => "1",
            PortDirCaps::Bidirectional => "2",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "0" => Some(PortDirCaps::Input),
            "1" => Some(PortDirCaps::Output),
            "2" => Some(PortDirCaps::Bidirectional),
            _ => None,
        }
    }
}

/// When a port announces unsolicited state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    #[default]
    NotSet,
    /// Never refresh.
    Off,
    /// The device refreshes on a timer.
    Periodic,
    /// Refresh whenever the state actually changes.
    Auto,
}

/// Who initiated a state change. External changes come over the wire and are
/// subject to the readonly check; internal changes are the device updating
/// its own readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    External,
    Internal,
}

/// Error condition attached to a port's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorState {
    #[default]
    Ok,
    /// The last known value is stale.
    Expired,
    /// No value can be produced.
    Unavailable,
}

/// State and bookkeeping shared by all port types.
///
/// Each typed port embeds one of these; the type-specific structs add their
/// own mode/value state on top.
#[derive(Debug)]
pub struct PortBase {
    id: String,
    label: String,
    dircaps: PortDirCaps,
    flags: i32,
    hidden: bool,
    readonly: bool,
    persistent: bool,
    refresh_mode: RefreshMode,
    refresh_required: bool,
    error_state: ErrorState,
    unit: Option<String>,
    icon: Option<String>,
    group: Option<String>,
    history: Option<History>,
}

impl PortBase {
    pub fn new(id: impl Into<String>, label: impl Into<String>, dircaps: PortDirCaps, flags: i32) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            dircaps,
            flags,
            hidden: false,
            readonly: false,
            persistent: false,
            refresh_mode: RefreshMode::NotSet,
            refresh_required: false,
            error_state: ErrorState::Ok,
            unit: None,
            icon: None,
            group: None,
            history: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.note_change(true);
    }

    pub fn dircaps(&self) -> PortDirCaps {
        self.dircaps
    }

    /// Advertised flags. Readonly ports always report [`flags::READONLY`].
    pub fn flags(&self) -> i32 {
        if self.readonly {
            self.flags | flags::READONLY
        } else {
            self.flags
        }
    }

    pub fn has_flag(&self, flag: i32) -> bool {
        (self.flags() & flag) == flag
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh_mode
    }

    pub fn set_refresh_mode(&mut self, mode: RefreshMode) {
        self.refresh_mode = mode;
    }

    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    pub fn set_error(&mut self, state: ErrorState) {
        self.error_state = state;
    }

    /// Check-and-clear of the refresh flag; the slave loop uses this to decide
    /// which ports go into the next unsolicited refresh message.
    pub fn take_refresh_required(&mut self) -> bool {
        std::mem::replace(&mut self.refresh_required, false)
    }

    pub fn refresh_required(&self) -> bool {
        self.refresh_required
    }

    /// Gate for external writes on readonly ports.
    pub fn check_writable(&self, source: ChangeSource) -> Result<()> {
        if self.readonly && source == ChangeSource::External {
            return Err(PortError::new(
                PortErrorKind::AccessDenied,
                &self.id,
                "port is read-only",
            ));
        }
        Ok(())
    }

    /// Gate for state queries: an error state must surface before any output
    /// parameter is trusted.
    pub fn check_value_available(&self) -> Result<()> {
        match self.error_state {
            ErrorState::Ok => Ok(()),
            ErrorState::Expired => Err(PortError::new(
                PortErrorKind::ValueExpired,
                &self.id,
                "value has expired",
            )),
            ErrorState::Unavailable => Err(PortError::new(
                PortErrorKind::ValueUnavailable,
                &self.id,
                "value is unavailable",
            )),
        }
    }

    /// Record the outcome of a successful mutation: clears the error state
    /// and, under Auto refresh mode, flags a refresh when the value actually
    /// changed or the port was previously in error.
    pub fn note_change(&mut self, changed: bool) {
        let had_error = self.error_state != ErrorState::Ok;
        self.error_state = ErrorState::Ok;
        if self.refresh_mode == RefreshMode::Auto && (changed || had_error) {
            self.refresh_required = true;
        }
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn set_unit(&mut self, unit: Option<String>) {
        self.unit = unit;
        self.note_change(true);
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn set_icon(&mut self, icon: Option<String>) {
        self.icon = icon;
        self.note_change(true);
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn set_group(&mut self, group: Option<String>) {
        self.group = group;
        self.note_change(true);
    }

    /// Extended info line (`key=value;` pairs with `\`-escaping).
    pub fn extended_info(&self) -> String {
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(unit) = &self.unit {
            pairs.push(("unit", unit));
        }
        if let Some(icon) = &self.icon {
            pairs.push(("icon", icon));
        }
        if let Some(group) = &self.group {
            pairs.push(("group", group));
        }
        format_properties(&pairs)
    }

    /// Replace the historic-value buffer. Values beyond `max_count` are
    /// dropped from the front (oldest first).
    pub fn set_history(&mut self, interval_s: u32, max_count: usize, values: &[i64]) {
        let start = values.len().saturating_sub(max_count);
        self.history = Some(History::new(interval_s, max_count, &values[start..]));
        self.note_change(true);
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }
}
