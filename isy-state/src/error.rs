//! Error types for the isy-state crate.

use isy_stream::XmlError;

/// Errors raised while applying controller events to the model.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The event document was missing something it needs
    #[error("XML error: {0}")]
    Xml(#[from] XmlError),

    /// The event refers to an entity that is not in the model
    #[error("Unknown {kind}: {id}")]
    UnknownEntity {
        /// Entity kind, e.g. "node"
        kind: &'static str,
        id: String,
    },

    /// A field carried a value that could not be interpreted
    #[error("Invalid {field} value: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

impl StateError {
    pub(crate) fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        StateError::UnknownEntity {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        StateError::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

/// Convenience type alias for Results using StateError.
pub type Result<T> = std::result::Result<T, StateError>;
