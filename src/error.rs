use std::sync::Arc;

use thiserror::Error;

use crate::graph::GraphError;
use crate::translate::TranslateError;

/// Bridge-level error taxonomy.
///
/// `Unsupported` and `InvalidAttribute` are recoverable by design: the
/// affected node or cluster falls back to native execution. `Structural`
/// indicates a broken rewrite invariant and aborts the whole rewrite.
/// `Engine` errors surface verbatim from the backend and are the caller's
/// responsibility.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unsupported op: node \"{node}\" ({op_type})")]
    Unsupported { node: String, op_type: String },

    #[error("invalid attribute on \"{node}\": {message}")]
    InvalidAttribute { node: String, message: String },

    #[error("graph structure violation: {message}")]
    Structural { message: String },

    #[error("shape error on \"{node}\": {message}")]
    Shape { node: String, message: String },

    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Translate(Arc<TranslateError>),
}

impl From<TranslateError> for BridgeError {
    fn from(error: TranslateError) -> Self {
        Self::Translate(Arc::new(error))
    }
}

impl From<Arc<TranslateError>> for BridgeError {
    fn from(error: Arc<TranslateError>) -> Self {
        Self::Translate(error)
    }
}

impl BridgeError {
    pub fn unsupported(node: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self::Unsupported {
            node: node.into(),
            op_type: op_type.into(),
        }
    }

    pub fn invalid_attribute(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    pub fn shape(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shape {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
