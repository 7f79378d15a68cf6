//! Integer and state variables
//!
//! Variable events carry a `<var type=".." id="..">` element with either an
//! `<init>` value or a `<val>` plus `<ts>` edit timestamp.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xmltree::Element;

use isy_stream::xml::{find_element, require_attr, require_value, value_from_xml};

use crate::error::{Result, StateError};
use crate::event::{keys, ChangeEvent, EntityId};
use crate::observable::Observable;

const TAG_VARIABLE: &str = "var";
const TAG_INIT: &str = "init";
const TAG_VALUE: &str = "val";
const TAG_TIMESTAMP: &str = "ts";
const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// Variable type as numbered by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Integer,
    State,
}

impl VariableKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1" => Some(VariableKind::Integer),
            "2" => Some(VariableKind::State),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            VariableKind::Integer => 1,
            VariableKind::State => 2,
        }
    }

    /// Human-readable protocol name
    pub fn protocol(&self) -> &'static str {
        match self {
            VariableKind::Integer => "integer variable",
            VariableKind::State => "state variable",
        }
    }
}

/// Type and id together identify a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub kind: VariableKind,
    pub id: u32,
}

impl VariableKey {
    pub fn new(kind: VariableKind, id: u32) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.code(), self.id)
    }
}

/// A controller variable.
#[derive(Debug)]
pub struct Variable {
    key: VariableKey,
    name: String,
    pub status: Observable<i64>,
    pub init: Observable<i64>,
    last_edited: RwLock<Option<NaiveDateTime>>,
}

impl Variable {
    pub fn new(key: VariableKey, name: impl Into<String>, init: i64, status: i64) -> Self {
        Self {
            key,
            name: name.into(),
            status: Observable::new(status),
            init: Observable::new(init),
            last_edited: RwLock::new(None),
        }
    }

    pub fn key(&self) -> VariableKey {
        self.key
    }

    /// Address in `type.id` form
    pub fn address(&self) -> String {
        self.key.to_string()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_edited(&self) -> Option<NaiveDateTime> {
        *self.last_edited.read()
    }
}

/// Collection of variables keyed by type and id.
#[derive(Debug, Default)]
pub struct VariableManager {
    variables: RwLock<HashMap<VariableKey, Arc<Variable>>>,
}

impl VariableManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, variable: Variable) -> Arc<Variable> {
        let variable = Arc::new(variable);
        self.variables.write().insert(variable.key(), Arc::clone(&variable));
        variable
    }

    pub fn get(&self, key: &VariableKey) -> Option<Arc<Variable>> {
        self.variables.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.variables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.read().is_empty()
    }

    /// Apply a variable event.
    ///
    /// An `<init>` element updates the init value; otherwise `<val>` and
    /// `<ts>` update the current value and edit time.
    pub fn update_received(&self, doc: &Element) -> Result<Vec<ChangeEvent>> {
        let raw_kind = require_attr(doc, TAG_VARIABLE, "type")?;
        let kind = VariableKind::parse(&raw_kind).ok_or_else(|| StateError::invalid("type", raw_kind))?;
        let raw_id = require_attr(doc, TAG_VARIABLE, "id")?;
        let id = raw_id.trim().parse::<u32>().map_err(|_| StateError::invalid("id", raw_id))?;
        let key = VariableKey::new(kind, id);

        let variable = self.get(&key).ok_or_else(|| StateError::unknown("variable", key.to_string()))?;
        let entity = EntityId::Variable(key);

        if find_element(doc, TAG_INIT).is_some() {
            let init = parse_int(TAG_INIT, &require_value(doc, TAG_INIT)?)?;
            let changed = variable.init.set(init);
            tracing::debug!(variable = %key, init, changed, "Variable init updated");
            return Ok(changed.then(|| ChangeEvent::new(entity, keys::INIT)).into_iter().collect());
        }

        let value = parse_int(TAG_VALUE, &require_value(doc, TAG_VALUE)?)?;
        let edited = match value_from_xml(doc, TAG_TIMESTAMP) {
            Some(raw) => Some(
                NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
                    .map_err(|_| StateError::invalid(TAG_TIMESTAMP, raw))?,
            ),
            None => None,
        };

        if edited.is_some() {
            *variable.last_edited.write() = edited;
        }
        let changed = variable.status.set(value);
        tracing::debug!(variable = %key, value, changed, "Variable value updated");
        Ok(changed.then(|| ChangeEvent::new(entity, keys::STATUS)).into_iter().collect())
    }
}

fn parse_int(field: &'static str, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|_| StateError::invalid(field, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use isy_stream::xml;

    fn manager() -> (VariableManager, Arc<Variable>) {
        let manager = VariableManager::new();
        let variable = manager.insert(Variable::new(
            VariableKey::new(VariableKind::State, 3),
            "Away",
            0,
            0,
        ));
        (manager, variable)
    }

    fn event(inner: &str) -> Element {
        xml::parse(&format!(
            "<Event><control>_1</control><action>6</action><eventInfo>{inner}</eventInfo></Event>"
        ))
        .unwrap()
    }

    #[test]
    fn test_value_update() {
        let (manager, variable) = manager();
        let doc = event(r#"<var type="2" id="3"><val>42</val><ts>20261016 10:15:30</ts></var>"#);

        let changes = manager.update_received(&doc).unwrap();
        assert_eq!(
            changes,
            vec![ChangeEvent::new(EntityId::Variable(variable.key()), keys::STATUS)]
        );
        assert_eq!(variable.status.get(), 42);
        assert_eq!(variable.init.get(), 0);
        assert_eq!(
            variable.last_edited(),
            NaiveDate::from_ymd_opt(2026, 10, 16).and_then(|d| d.and_hms_opt(10, 15, 30))
        );

        // Same value again: no change
        assert!(manager.update_received(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_init_update_leaves_value() {
        let (manager, variable) = manager();
        let doc = event(r#"<var type="2" id="3"><init>7</init></var>"#);

        let changes = manager.update_received(&doc).unwrap();
        assert_eq!(changes[0].property_key, keys::INIT);
        assert_eq!(variable.init.get(), 7);
        assert_eq!(variable.status.get(), 0);
        assert!(variable.last_edited().is_none());
    }

    #[test]
    fn test_unknown_variable() {
        let (manager, _) = manager();
        let doc = event(r#"<var type="1" id="3"><val>1</val></var>"#);

        assert!(matches!(
            manager.update_received(&doc),
            Err(StateError::UnknownEntity { kind: "variable", .. })
        ));
    }

    #[test]
    fn test_invalid_fields() {
        let (manager, _) = manager();

        let doc = event(r#"<var type="9" id="3"><val>1</val></var>"#);
        assert!(matches!(manager.update_received(&doc), Err(StateError::InvalidValue { field: "type", .. })));

        let doc = event(r#"<var type="2" id="3"><val>high</val></var>"#);
        assert!(matches!(manager.update_received(&doc), Err(StateError::InvalidValue { field: "val", .. })));

        let doc = event(r#"<var type="2" id="3"><val>1</val><ts>yesterday</ts></var>"#);
        assert!(matches!(manager.update_received(&doc), Err(StateError::InvalidValue { field: "ts", .. })));

        let doc = event(r#"<var id="3"><val>1</val></var>"#);
        assert!(matches!(manager.update_received(&doc), Err(StateError::Xml(_))));
    }

    #[test]
    fn test_listener_sees_new_value() {
        let (manager, variable) = manager();
        let seen = Arc::new(RwLock::new(None));
        let sink = Arc::clone(&seen);
        variable.status.subscribe(move |value| *sink.write() = Some(*value));

        manager
            .update_received(&event(r#"<var type="2" id="3"><val>-5</val></var>"#))
            .unwrap();
        assert_eq!(*seen.read(), Some(-5));
    }
}
