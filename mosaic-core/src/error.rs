#![forbid(unsafe_code)]

use miette::Diagnostic;
use mosaic_ir::{IndexError, TreeError};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PrimitiveError {
    /// An operand violates a primitive's contract. Raised at bind time.
    #[error("{primitive}: {message}")]
    #[diagnostic(code(mosaic::validation))]
    Validation {
        primitive: &'static str,
        message: String,
    },

    /// Registry or lowering table is missing an entry, or one was registered twice.
    #[error("configuration error: {message}")]
    #[diagnostic(code(mosaic::configuration))]
    Configuration { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tree(#[from] TreeError),

    /// The trace context was used in a way it cannot record.
    #[error("trace error: {message}")]
    #[diagnostic(code(mosaic::trace))]
    Trace { message: String },
}

pub type Result<T, E = PrimitiveError> = std::result::Result<T, E>;

impl PrimitiveError {
    pub fn validation(primitive: &'static str, message: impl Into<String>) -> Self {
        PrimitiveError::Validation {
            primitive,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PrimitiveError::Configuration {
            message: message.into(),
        }
    }

    pub fn trace(message: impl Into<String>) -> Self {
        PrimitiveError::Trace {
            message: message.into(),
        }
    }
}
