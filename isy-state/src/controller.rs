//! The controller model and its event stream wiring

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::{Mutex, RwLock};
use xmltree::Element;

use isy_stream::EventHandler;

use crate::configuration::Configuration;
use crate::error::{Result, StateError};
use crate::event::{keys, ChangeEvent, EntityId};
use crate::iter::ChangeIterator;
use crate::node::NodeManager;
use crate::observable::EventEmitter;
use crate::program::ProgramManager;
use crate::variable::VariableManager;

/// Nodes, variables and programs of one controller, kept current by its
/// event stream.
///
/// `Controller` implements [`EventHandler`], so an `Arc<Controller>` can be
/// handed straight to a [`Session`](isy_stream::Session).
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use isy_state::{Controller, Node};
/// use isy_stream::{Session, StreamConfig};
///
/// let controller = Arc::new(Controller::new());
/// controller.nodes().insert(Node::new("1A 2B 3C 1", "Kitchen"));
///
/// let session = Session::new(StreamConfig::new("192.168.1.20", 80), controller.clone())?;
/// session.start()?;
///
/// for change in controller.changes() {
///     println!("{} changed on {}", change.property_key, change.entity);
/// }
/// # Ok::<(), isy_stream::StreamError>(())
/// ```
pub struct Controller {
    nodes: NodeManager,
    variables: VariableManager,
    programs: ProgramManager,
    configuration: RwLock<Option<Configuration>>,
    /// Fires each time the event stream is lost
    pub connection_lost: EventEmitter<()>,
    lost_count: AtomicU64,
    change_tx: mpsc::Sender<ChangeEvent>,
    change_rx: Arc<Mutex<mpsc::Receiver<ChangeEvent>>>,
}

impl Controller {
    pub fn new() -> Self {
        let (change_tx, change_rx) = mpsc::channel();
        Self {
            nodes: NodeManager::new(),
            variables: VariableManager::new(),
            programs: ProgramManager::new(),
            configuration: RwLock::new(None),
            connection_lost: EventEmitter::new(),
            lost_count: AtomicU64::new(0),
            change_tx,
            change_rx: Arc::new(Mutex::new(change_rx)),
        }
    }

    pub fn nodes(&self) -> &NodeManager {
        &self.nodes
    }

    pub fn variables(&self) -> &VariableManager {
        &self.variables
    }

    pub fn programs(&self) -> &ProgramManager {
        &self.programs
    }

    /// Parse and store the controller configuration document
    pub fn load_configuration(&self, xml: &str) -> Result<Configuration> {
        let configuration = Configuration::parse(xml)?;
        *self.configuration.write() = Some(configuration.clone());
        Ok(configuration)
    }

    pub fn configuration(&self) -> Option<Configuration> {
        self.configuration.read().clone()
    }

    /// Iterator over model changes
    pub fn changes(&self) -> ChangeIterator {
        ChangeIterator::new(Arc::clone(&self.change_rx))
    }

    /// Times the event stream was reported lost
    pub fn connection_lost_count(&self) -> u64 {
        self.lost_count.load(Ordering::SeqCst)
    }

    fn emit(&self, change: ChangeEvent) {
        // The receiver lives as long as self, so send only fails during teardown
        let _ = self.change_tx.send(change);
    }

    fn apply(&self, entity: &'static str, result: Result<Vec<ChangeEvent>>) {
        match result {
            Ok(changes) => changes.into_iter().for_each(|change| self.emit(change)),
            Err(StateError::UnknownEntity { kind, id }) => {
                tracing::debug!(kind, id = %id, "Event for an entity not in the model");
            }
            Err(e) => {
                tracing::warn!(entity, error = %e, "Could not apply event");
            }
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("nodes", &self.nodes.len())
            .field("variables", &self.variables.len())
            .field("programs", &self.programs.len())
            .field("lost_count", &self.connection_lost_count())
            .finish()
    }
}

impl EventHandler for Controller {
    fn on_node_status(&self, doc: &Element) {
        self.apply("node", self.nodes.update_received(doc));
    }

    fn on_node_control(&self, doc: &Element) {
        self.apply("node", self.nodes.control_message_received(doc));
    }

    fn on_variable_update(&self, doc: &Element) {
        self.apply("variable", self.variables.update_received(doc));
    }

    fn on_program_update(&self, doc: &Element) {
        self.apply("program", self.programs.update_received(doc));
    }

    fn on_program_list_refresh(&self) {
        let change = self.programs.request_refresh();
        self.emit(change);
    }

    fn on_connection_lost(&self) {
        let count = self.lost_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(count, "Controller event stream lost");
        self.emit(ChangeEvent::new(EntityId::Controller, keys::CONNECTION));
        self.connection_lost.publish(&());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeValue};
    use isy_stream::xml;
    use std::time::Duration;

    fn doc(text: &str) -> Element {
        xml::parse(text).unwrap()
    }

    #[test]
    fn test_status_event_emits_change() {
        let controller = Controller::new();
        let node = controller.nodes().insert(Node::new("1A 2B 3C 1", "Kitchen"));

        controller.on_node_status(&doc(
            "<Event><control>ST</control><action>255</action><node>1A 2B 3C 1</node></Event>",
        ));

        assert_eq!(node.status.get(), NodeValue::Value(255));
        let change = controller.changes().try_recv().unwrap();
        assert_eq!(change, ChangeEvent::new(EntityId::Node("1A 2B 3C 1".to_string()), keys::STATUS));
    }

    #[test]
    fn test_unknown_entities_are_skipped() {
        let controller = Controller::new();
        controller.on_node_status(&doc(
            "<Event><control>ST</control><action>255</action><node>FF FF FF 1</node></Event>",
        ));
        controller.on_variable_update(&doc(r#"<Event><var type="1" id="1"><val>1</val></var></Event>"#));

        assert!(controller.changes().try_recv().is_none());
    }

    #[test]
    fn test_refresh_and_loss_events() {
        let controller = Controller::new();
        let lost = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&lost);
        controller.connection_lost.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.on_program_list_refresh();
        controller.on_connection_lost();

        let changes: Vec<_> = controller.changes().timeout_iter(Duration::from_millis(10)).collect();
        assert_eq!(
            changes,
            vec![
                ChangeEvent::new(EntityId::ProgramList, keys::REFRESH),
                ChangeEvent::new(EntityId::Controller, keys::CONNECTION),
            ]
        );
        assert_eq!(controller.programs().refresh_count(), 1);
        assert_eq!(controller.connection_lost_count(), 1);
        assert_eq!(lost.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_configuration() {
        let controller = Controller::new();
        assert!(controller.configuration().is_none());

        controller
            .load_configuration("<configuration><app_full_version>5.3.4</app_full_version></configuration>")
            .unwrap();
        assert_eq!(controller.configuration().and_then(|c| c.firmware).as_deref(), Some("5.3.4"));
    }
}
