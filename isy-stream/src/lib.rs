//! # isy-stream
//!
//! Event stream client for ISY home-automation controllers.
//!
//! A controller pushes events over a long-lived socket after the client
//! POSTs a SOAP `Subscribe` on it. Each event is an HTTP-style header block
//! followed by a `Content-Length`-sized XML body. This crate handles the
//! subscription handshake, reassembles event bodies from the raw byte stream,
//! watches the controller's heartbeat, and dispatches each event to an
//! [`EventHandler`] by its control code.
//!
//! # Architecture
//!
//! ```text
//! socket → FrameAssembler → EventRouter → EventHandler
//!                               │
//!                               ├→ HeartbeatMonitor
//!                               └→ SubscriptionProtocol (stream id)
//! ```
//!
//! The read loop runs on a dedicated thread owned by a [`Session`]. Loss of
//! the connection, whether from a socket error, a framing error, or a missed
//! heartbeat, is reported through [`EventHandler::on_connection_lost`]. The
//! session does not reconnect on its own.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use isy_stream::{EventHandler, Session, StreamConfig};
//! use xmltree::Element;
//!
//! struct Print;
//!
//! impl EventHandler for Print {
//!     fn on_node_status(&self, doc: &Element) {
//!         println!("{:?}", isy_stream::xml::value_from_xml(doc, "node"));
//!     }
//! }
//!
//! let session = Session::new(StreamConfig::from_env()?, Arc::new(Print))?;
//! session.start()?;
//! # Ok::<(), isy_stream::StreamError>(())
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod logging;
pub mod router;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod xml;

pub use config::{Credentials, StreamConfig, TlsVersion};
pub use error::{FrameError, Result, StreamError, XmlError};
pub use frame::FrameAssembler;
pub use heartbeat::HeartbeatMonitor;
pub use router::{ControlCode, EventHandler, EventRouter, IgnoreReason, Route, RouteOutcome};
pub use session::{Session, SessionState};
pub use subscription::SubscriptionProtocol;
pub use transport::EventSocket;

/// Re-exports for handler implementations
pub mod prelude {
    pub use crate::router::EventHandler;
    pub use crate::session::{Session, SessionState};
    pub use crate::xml::{attr_from_xml, value_from_xml};
    pub use crate::{Result, StreamConfig, StreamError};
    pub use xmltree::Element;
}
