use crate::error::{PortError, PortErrorKind, Result};

/// A named container for organizing ports into a display hierarchy.
///
/// The parent is another group's ID, or the empty string for root — never
/// absent.
#[derive(Debug, Clone)]
pub struct PortGroup {
    id: String,
    label: String,
    parent: String,
    flags: i32,
}

impl PortGroup {
    pub fn new(id: impl Into<String>, label: impl Into<String>, flags: i32) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            parent: String::new(),
            flags,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }
}

/// Insertion-ordered registry of port groups.
#[derive(Debug, Default)]
pub struct PortGroups {
    groups: Vec<PortGroup>,
}

impl PortGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group. Its ID must be unique and its parent (when not
    /// root) must already be registered, which keeps the hierarchy acyclic.
    pub fn add(&mut self, group: PortGroup) -> Result<()> {
        if self.find(group.id()).is_some() {
            return Err(PortError::new(
                PortErrorKind::InvalidRange,
                group.id(),
                "duplicate group ID",
            ));
        }
        if !group.parent().is_empty() && self.find(group.parent()).is_none() {
            return Err(PortError::new(
                PortErrorKind::InvalidRange,
                group.id(),
                format!("unknown parent group {:?}", group.parent()),
            ));
        }
        self.groups.push(group);
        Ok(())
    }

    /// Re-parent an existing group, rejecting hierarchy cycles.
    pub fn set_parent(&mut self, id: &str, parent: &str) -> Result<()> {
        if self.find(id).is_none() {
            return Err(PortError::new(
                PortErrorKind::InvalidRange,
                id,
                "unknown group",
            ));
        }
        if !parent.is_empty() {
            if self.find(parent).is_none() {
                return Err(PortError::new(
                    PortErrorKind::InvalidRange,
                    id,
                    format!("unknown parent group {parent:?}"),
                ));
            }
            // walk up from the proposed parent looking for id
            let mut current = parent.to_string();
            while !current.is_empty() {
                if current == id {
                    return Err(PortError::new(
                        PortErrorKind::InvalidRange,
                        id,
                        format!("group hierarchy cycle via {parent:?}"),
                    ));
                }
                current = self
                    .find(&current)
                    .map(|g| g.parent().to_string())
                    .unwrap_or_default();
            }
        }

        let group = self
            .groups
            .iter_mut()
            .find(|g| g.id() == id)
            .expect("existence checked above");
        group.parent = parent.to_string();
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<&PortGroup> {
        self.groups.iter().find(|g| g.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
