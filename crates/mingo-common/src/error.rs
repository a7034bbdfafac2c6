//! Error types for mingo

use thiserror::Error;

/// Result type alias for mingo operations
pub type Result<T> = std::result::Result<T, MingoError>;

/// Unified error type for all mingo operations
#[derive(Error, Debug, Clone)]
pub enum MingoError {
    /// Malformed or schema-invalid query-set or context document
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Duplicate query name: {0}")]
    DuplicateQueryName(String),

    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    /// Placeholder evaluation failed (syntax or type error)
    #[error("Expression evaluation error: {0}")]
    ExpressionEvaluation(String),

    /// Placeholder referenced a parameter that was not supplied
    #[error("Unresolved variable: {0}")]
    UnresolvedVariable(String),

    #[error("No converter found: {0}")]
    NoConverterFound(String),

    /// Data-store failure or structurally invalid statement
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Context initialization failed: {0}")]
    ContextInitialization(#[source] Box<MingoError>),

    /// Every teardown failure collected during a best-effort shutdown
    #[error("Shutdown failed: {}", join_causes(.0))]
    Shutdown(Vec<MingoError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_causes(causes: &[MingoError]) -> String {
    causes
        .iter()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl MingoError {
    /// Returns true for placeholder evaluation failures of any kind
    pub fn is_expression_error(&self) -> bool {
        matches!(
            self,
            MingoError::ExpressionEvaluation(_) | MingoError::UnresolvedVariable(_)
        )
    }

    /// Returns true for registry integrity failures
    pub fn is_registry_error(&self) -> bool {
        matches!(
            self,
            MingoError::DuplicateQueryName(_) | MingoError::UnknownQuery(_)
        )
    }

    /// Wraps a startup failure, keeping the original cause
    pub fn context_initialization(cause: MingoError) -> Self {
        match cause {
            already @ MingoError::ContextInitialization(_) => already,
            other => MingoError::ContextInitialization(Box::new(other)),
        }
    }

    /// The startup failure wrapped by `ContextInitialization`, if any
    pub fn initialization_cause(&self) -> Option<&MingoError> {
        match self {
            MingoError::ContextInitialization(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MingoError {
    fn from(err: serde_json::Error) -> Self {
        MingoError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for MingoError {
    fn from(err: mongodb::error::Error) -> Self {
        MingoError::Execution(format!("MongoDB error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for MingoError {
    fn from(err: bson::ser::Error) -> Self {
        MingoError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for MingoError {
    fn from(err: bson::de::Error) -> Self {
        MingoError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
