//! Error types for the isy-stream crate.

use std::io;
use std::time::Duration;

/// Errors that can occur while running the event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The TCP connection to the controller could not be established
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// The address that was dialed
        addr: String,
        /// The underlying socket error
        #[source]
        source: io::Error,
    },

    /// TLS context creation or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Socket read or write failed
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream could not be split into frames
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    /// No heartbeat arrived within the interval declared by the controller
    #[error("Heartbeat timeout: {elapsed:?} elapsed, controller declared {wait:?}")]
    HeartbeatTimeout {
        /// Time since the last heartbeat
        elapsed: Duration,
        /// Wait interval declared by the last heartbeat
        wait: Duration,
    },

    /// The controller closed the socket
    #[error("Connection closed by controller")]
    Closed,

    /// An operation needed an open socket
    #[error("Not connected to the event stream")]
    NotConnected,

    /// The read loop thread could not be started
    #[error("Failed to spawn event stream worker: {0}")]
    WorkerSpawn(String),
}

/// Errors from the frame assembler.
///
/// Both variants are connection-fatal: once the header block is unreadable
/// there is no way to find the start of the next frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A header block ended without a content-length header
    #[error("Header block has no content-length")]
    MissingContentLength,

    /// The content-length header value is not a byte count
    #[error("Invalid content-length value: {0:?}")]
    InvalidContentLength(String),
}

/// Errors from XML helpers.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// The document is not well-formed
    #[error("Malformed XML: {0}")]
    Malformed(String),

    /// A required element is absent
    #[error("Missing element: {0}")]
    MissingElement(String),

    /// A required attribute is absent
    #[error("Missing attribute {attribute} on element {element}")]
    MissingAttribute {
        /// Element that was searched
        element: String,
        /// Attribute that was not found
        attribute: String,
    },
}

/// Convenience type alias for Results using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
