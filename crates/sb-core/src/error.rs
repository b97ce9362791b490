use crate::types::SourcePosition;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The embedded runtime cannot be created on this host. Fatal, not retried.
    Initialization,
    Config,
    Compile,
    /// A run failed. The handle that produced it stays usable.
    Evaluation,
    TypeCoercion,
}

#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct ScriptBridgeError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub position: Option<SourcePosition>,
}

impl ScriptBridgeError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            position: None,
        }
    }

    pub fn with_position(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        position: SourcePosition,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            position: Some(position),
        }
    }

    pub fn initialization(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Initialization, code, message)
    }

    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, code, message)
    }

    pub fn evaluation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation, code, message)
    }

    pub fn type_coercion(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeCoercion, code, message)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Initialization | ErrorKind::Config)
    }
}
