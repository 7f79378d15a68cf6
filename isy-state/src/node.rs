//! Nodes and their status / control events

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xmltree::Element;

use isy_stream::router::{TAG_ACTION, TAG_CONTROL};
use isy_stream::xml::{attr_from_xml, require_value, value_from_xml};

use crate::error::{Result, StateError};
use crate::event::{keys, ChangeEvent, EntityId};
use crate::observable::{EventEmitter, Observable};

const TAG_NODE: &str = "node";
const TAG_FORMATTED: &str = "fmtAct";
const ATTR_UOM: &str = "uom";
const ATTR_PREC: &str = "prec";

/// Control codes that are commands rather than properties. They are
/// published as control events but never stored as aux properties.
pub const COMMAND_CONTROLS: &[&str] = &[
    "DON", "DOF", "DFON", "DFOF", "DIM", "BRT", "BMAN", "SMAN", "FDUP", "FDDOWN", "FDSTOP", "BEEP",
    "RESET", "X10",
];

/// A raw node value as reported in an event's `<action>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeValue {
    /// Empty or non-numeric action
    #[default]
    Unknown,
    Value(i64),
}

impl NodeValue {
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(NodeValue::Value)
            .unwrap_or(NodeValue::Unknown)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NodeValue::Value(value) => Some(*value),
            NodeValue::Unknown => None,
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Value(value) => write!(f, "{value}"),
            NodeValue::Unknown => f.write_str("unknown"),
        }
    }
}

/// One control event or property reading from a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProperty {
    pub address: String,
    pub control: String,
    pub value: NodeValue,
    pub prec: String,
    pub uom: String,
    pub formatted: Option<String>,
}

impl NodeProperty {
    fn from_event(address: String, control: String, doc: &Element) -> Self {
        Self {
            address,
            control,
            value: NodeValue::parse(value_from_xml(doc, TAG_ACTION).as_deref()),
            prec: attr_from_xml(doc, TAG_ACTION, ATTR_PREC).unwrap_or_else(|| "0".to_string()),
            uom: attr_from_xml(doc, TAG_ACTION, ATTR_UOM).unwrap_or_default(),
            formatted: value_from_xml(doc, TAG_FORMATTED),
        }
    }

    pub fn is_command(&self) -> bool {
        COMMAND_CONTROLS.contains(&self.control.as_str())
    }
}

#[derive(Debug, Default)]
struct NodeDetails {
    uom: String,
    prec: String,
    formatted: Option<String>,
    aux_properties: HashMap<String, NodeProperty>,
}

/// A device node.
#[derive(Debug)]
pub struct Node {
    address: String,
    name: String,
    pub status: Observable<NodeValue>,
    /// Every control event received for this node
    pub control_events: EventEmitter<NodeProperty>,
    details: RwLock<NodeDetails>,
}

impl Node {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            status: Observable::new(NodeValue::Unknown),
            control_events: EventEmitter::new(),
            details: RwLock::new(NodeDetails {
                prec: "0".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uom(&self) -> String {
        self.details.read().uom.clone()
    }

    /// Decimal precision of the raw value (value × 10^-prec)
    pub fn prec(&self) -> String {
        self.details.read().prec.clone()
    }

    pub fn formatted(&self) -> Option<String> {
        self.details.read().formatted.clone()
    }

    pub fn aux_property(&self, control: &str) -> Option<NodeProperty> {
        self.details.read().aux_properties.get(control).cloned()
    }

    pub fn aux_properties(&self) -> HashMap<String, NodeProperty> {
        self.details.read().aux_properties.clone()
    }

    fn update_units(details: &mut NodeDetails, uom: &str, prec: &str) {
        if !uom.is_empty() {
            details.uom = uom.to_string();
        }
        // "0" is the attribute default and never overrides a known precision
        if !prec.is_empty() && prec != "0" {
            details.prec = prec.to_string();
        }
    }
}

/// Collection of nodes keyed by address.
#[derive(Debug, Default)]
pub struct NodeManager {
    nodes: RwLock<HashMap<String, Arc<Node>>>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.nodes.write().insert(node.address().to_string(), Arc::clone(&node));
        node
    }

    pub fn get(&self, address: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(address).cloned()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn lookup(&self, doc: &Element) -> Result<Arc<Node>> {
        let address = require_value(doc, TAG_NODE)?;
        self.get(&address).ok_or_else(|| StateError::unknown("node", address))
    }

    /// Apply a status (`ST`) event: units, formatted value, then status.
    pub fn update_received(&self, doc: &Element) -> Result<Vec<ChangeEvent>> {
        let node = self.lookup(doc)?;
        let reading = NodeProperty::from_event(node.address.clone(), "ST".to_string(), doc);

        {
            let mut details = node.details.write();
            Node::update_units(&mut details, &reading.uom, &reading.prec);
            details.formatted = reading.formatted.clone();
        }

        let changed = node.status.set(reading.value);
        tracing::debug!(node = %node.address, value = %reading.value, changed, "Node status updated");
        Ok(changed
            .then(|| ChangeEvent::new(EntityId::Node(node.address.clone()), keys::STATUS))
            .into_iter()
            .collect())
    }

    /// Apply a node control event and publish it on the node's emitter.
    ///
    /// Property codes (`OL`, `RR`, `CLISPH`, ...) also refresh the node's
    /// aux property of that name.
    pub fn control_message_received(&self, doc: &Element) -> Result<Vec<ChangeEvent>> {
        let node = self.lookup(doc)?;
        let control = require_value(doc, TAG_CONTROL)?;
        let property = NodeProperty::from_event(node.address.clone(), control, doc);

        if !property.is_command() {
            let mut details = node.details.write();
            Node::update_units(&mut details, &property.uom, &property.prec);
            details.aux_properties.insert(property.control.clone(), property.clone());
        }

        tracing::debug!(node = %node.address, control = %property.control, value = %property.value, "Node control event");
        node.control_events.publish(&property);
        Ok(vec![ChangeEvent::new(EntityId::Node(node.address.clone()), keys::CONTROL)])
    }
}
