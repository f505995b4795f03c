use serde_json::Value;
use thiserror::Error;

use crate::db::Collection;

/// Everything that can go wrong while serving one request.
///
/// Each variant is scoped to the message that produced it: the handler turns
/// it into a `Reply` and the connection keeps going.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("could not decode request: {0}")]
    Decode(String),

    #[error("request has no action")]
    MissingAction,

    #[error("unhandled action: '{0}'")]
    UnhandledAction(String),

    #[error("revision mismatch (submitted {submitted:?}, current {current})")]
    RevisionMismatch { submitted: Option<u64>, current: u64 },

    #[error("invalid item at index {index} of {collection}: {batch}")]
    InvalidItem {
        collection: Collection,
        index: usize,
        batch: Value,
    },

    #[error("operation is not supported")]
    Unsupported,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(src: serde_json::Error) -> ProtocolError {
        ProtocolError::Decode(src.to_string())
    }
}
