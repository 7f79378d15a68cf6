//! Change events for model updates
//!
//! Events name the entity and property that changed, not the new value.
//! Read the value from the model after receiving an event.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::variable::VariableKey;

/// Property keys carried by [`ChangeEvent`]s
pub mod keys {
    /// Node status, variable value, or program status
    pub const STATUS: &str = "status";
    /// Variable init value
    pub const INIT: &str = "init";
    /// A node control event was published
    pub const CONTROL: &str = "control";
    /// Program run times, enabled flag or counters
    pub const RUN_STATE: &str = "run_state";
    /// The program list must be reloaded
    pub const REFRESH: &str = "refresh";
    /// The event stream connection was lost
    pub const CONNECTION: &str = "connection";
}

/// The entity a change applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Node(String),
    Variable(VariableKey),
    Program(String),
    ProgramList,
    Controller,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Node(address) => write!(f, "node {address}"),
            EntityId::Variable(key) => write!(f, "variable {key}"),
            EntityId::Program(id) => write!(f, "program {id}"),
            EntityId::ProgramList => f.write_str("program list"),
            EntityId::Controller => f.write_str("controller"),
        }
    }
}

/// A change event emitted when the model changes
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub entity: EntityId,

    /// One of [`keys`]
    pub property_key: &'static str,

    /// When the change was applied
    pub timestamp: Instant,
}

impl ChangeEvent {
    pub fn new(entity: EntityId, property_key: &'static str) -> Self {
        Self {
            entity,
            property_key,
            timestamp: Instant::now(),
        }
    }
}

impl PartialEq for ChangeEvent {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.entity == other.entity && self.property_key == other.property_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableKind;

    #[test]
    fn test_change_event_equality_ignores_timestamp() {
        let a = ChangeEvent::new(EntityId::Node("1A 2B 3C 1".to_string()), keys::STATUS);
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = ChangeEvent::new(EntityId::Node("1A 2B 3C 1".to_string()), keys::STATUS);
        let c = ChangeEvent::new(EntityId::Node("1A 2B 3C 1".to_string()), keys::CONTROL);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_entity_display() {
        let key = VariableKey::new(VariableKind::State, 3);
        assert_eq!(EntityId::Variable(key).to_string(), "variable 2.3");
        assert_eq!(EntityId::Program("001F".to_string()).to_string(), "program 001F");
    }
}
