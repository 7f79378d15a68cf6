//! # isy-state
//!
//! In-memory model of an ISY controller's nodes, variables and programs,
//! kept current by the event stream from `isy-stream`.
//!
//! # Features
//!
//! - **Observable values**: node, variable and program status notify
//!   listeners only when the value actually changes
//! - **Control events**: every node control code is published on the node's
//!   [`EventEmitter`], property codes are also kept as aux properties
//! - **Change iteration**: consume [`ChangeEvent`]s through a blocking
//!   [`ChangeIterator`]
//!
//! # Architecture
//!
//! ```text
//! Session → EventRouter → Controller (EventHandler)
//!                             ├→ NodeManager      → Observable / EventEmitter
//!                             ├→ VariableManager  → Observable
//!                             ├→ ProgramManager   → Observable, refresher
//!                             └→ ChangeIterator
//! ```
//!
//! Entities are inserted by the application (typically from the REST
//! layer); events for entities not in the model are skipped.

pub mod configuration;
pub mod controller;
pub mod error;
pub mod event;
pub mod iter;
pub mod node;
pub mod observable;
pub mod program;
pub mod variable;

pub use configuration::{Configuration, Feature};
pub use controller::Controller;
pub use error::{Result, StateError};
pub use event::{keys, ChangeEvent, EntityId};
pub use iter::{ChangeIterator, TimeoutIter, TryIter};
pub use node::{Node, NodeManager, NodeProperty, NodeValue};
pub use observable::{EventEmitter, ListenerId, Observable};
pub use program::{Program, ProgramManager, RunState};
pub use variable::{Variable, VariableKey, VariableKind, VariableManager};
