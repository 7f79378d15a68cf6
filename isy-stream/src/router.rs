//! Event routing by control code.
//!
//! Every event body is an `<Event>` document whose `<control>` element says
//! what kind of event it is. The code space is fixed by controller firmware:
//!
//! | code            | meaning                                   |
//! |-----------------|-------------------------------------------|
//! | `_0`            | heartbeat, `<action>` = seconds to next   |
//! | `ST`            | node status property update               |
//! | no `_` prefix   | node control event (`DON`, `DOF`, ...)    |
//! | `_1`            | trigger: variable, program, or folder     |
//! | other `_N`      | ignored                                   |
//!
//! Trigger events are told apart by scanning the raw body text, in this
//! order: `<var` → variable, `<id>` → program, `<node>` with `[` → duplicate
//! node-server update (ignored), anything else → full program refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use xmltree::Element;

use crate::heartbeat::HeartbeatMonitor;
use crate::subscription::{SubscriptionProtocol, STREAM_ID_ATTR};
use crate::xml::{self, value_from_xml};

pub const TAG_CONTROL: &str = "control";
pub const TAG_ACTION: &str = "action";

const HEARTBEAT: &str = "_0";
const TRIGGER: &str = "_1";
const STATUS: &str = "ST";

/// Receives routed events.
///
/// This is the seam between the stream reader and whatever keeps the
/// device model. Every method has an empty default so implementors only
/// handle what they care about.
pub trait EventHandler: Send + Sync {
    /// A node's status property changed (`ST`)
    fn on_node_status(&self, _doc: &Element) {}

    /// A node reported a control event (`DON`, `DOF`, `OL`, ...)
    fn on_node_control(&self, _doc: &Element) {}

    /// A variable value or init value changed
    fn on_variable_update(&self, _doc: &Element) {}

    /// A program's state changed
    fn on_program_update(&self, _doc: &Element) {}

    /// Something about programs changed without saying what
    fn on_program_list_refresh(&self) {}

    /// The event stream connection was lost or could not be opened
    fn on_connection_lost(&self) {}
}

/// Control code of an event, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCode {
    Heartbeat,
    Status,
    Trigger,
    /// A node control code, e.g. `DON`
    NodeControl(String),
    /// An underscore code this client does not handle
    Unhandled(String),
}

impl ControlCode {
    pub fn parse(code: &str) -> Self {
        match code {
            HEARTBEAT => ControlCode::Heartbeat,
            STATUS => ControlCode::Status,
            _ if !code.starts_with('_') => ControlCode::NodeControl(code.to_string()),
            TRIGGER => ControlCode::Trigger,
            _ => ControlCode::Unhandled(code.to_string()),
        }
    }
}

/// Where an event was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Heartbeat { wait: Option<Duration> },
    NodeStatus,
    NodeControl(String),
    Variable,
    Program,
    ProgramListRefresh,
}

/// Why an event was dropped without dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    NoControlCode,
    UnhandledControlCode(String),
    DuplicateNodeUpdate,
}

/// Result of routing one event body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Dispatched(Route),
    Ignored(IgnoreReason),
    /// The body was not well-formed XML
    ParseError(String),
}

/// Parses event bodies and dispatches them.
pub struct EventRouter {
    handler: Arc<dyn EventHandler>,
    subscription: Arc<SubscriptionProtocol>,
    heartbeat: Arc<Mutex<HeartbeatMonitor>>,
}

impl EventRouter {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        subscription: Arc<SubscriptionProtocol>,
        heartbeat: Arc<Mutex<HeartbeatMonitor>>,
    ) -> Self {
        Self {
            handler,
            subscription,
            heartbeat,
        }
    }

    /// Route one complete event body.
    ///
    /// Malformed XML is reported and dropped; it never ends the stream.
    pub fn route(&self, body: &str) -> RouteOutcome {
        let doc = match xml::parse(body) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, body, "Received malformed XML");
                return RouteOutcome::ParseError(e.to_string());
            }
        };
        tracing::trace!(body, "Update received");

        if body.contains(&format!("{STREAM_ID_ATTR}=")) && !self.subscription.has_stream_id() {
            self.subscription.capture_stream_id(&doc);
        }

        let Some(code) = value_from_xml(&doc, TAG_CONTROL) else {
            return RouteOutcome::Ignored(IgnoreReason::NoControlCode);
        };

        match ControlCode::parse(&code) {
            ControlCode::Heartbeat => {
                let wait = self.record_heartbeat(&doc);
                RouteOutcome::Dispatched(Route::Heartbeat { wait })
            }
            ControlCode::Status => {
                self.handler.on_node_status(&doc);
                RouteOutcome::Dispatched(Route::NodeStatus)
            }
            ControlCode::NodeControl(code) => {
                self.handler.on_node_control(&doc);
                RouteOutcome::Dispatched(Route::NodeControl(code))
            }
            ControlCode::Trigger => self.route_trigger(body, &doc),
            ControlCode::Unhandled(code) => {
                tracing::trace!(control = %code, "Ignoring unhandled control code");
                RouteOutcome::Ignored(IgnoreReason::UnhandledControlCode(code))
            }
        }
    }

    fn record_heartbeat(&self, doc: &Element) -> Option<Duration> {
        let wait = value_from_xml(doc, TAG_ACTION).and_then(|raw| match raw.trim().parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                tracing::warn!(action = %raw, "Heartbeat carried a non-numeric interval");
                None
            }
        });

        let mut heartbeat = self.heartbeat.lock();
        heartbeat.record(Instant::now(), wait);
        if let Some(at) = heartbeat.last_heartbeat() {
            tracing::debug!(at = %at.to_rfc3339(), wait = ?heartbeat.wait(), "Heartbeat");
        }
        wait
    }

    fn route_trigger(&self, body: &str, doc: &Element) -> RouteOutcome {
        if body.contains("<var") {
            self.handler.on_variable_update(doc);
            RouteOutcome::Dispatched(Route::Variable)
        } else if body.contains("<id>") {
            self.handler.on_program_update(doc);
            RouteOutcome::Dispatched(Route::Program)
        } else if body.contains("<node>") && body.contains('[') {
            // Node servers echo node updates as triggers; the ST event already covered it.
            RouteOutcome::Ignored(IgnoreReason::DuplicateNodeUpdate)
        } else {
            self.handler.on_program_list_refresh();
            RouteOutcome::Dispatched(Route::ProgramListRefresh)
        }
    }
}
