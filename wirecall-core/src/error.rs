use crate::exception::StackFrame;
use crate::route::RouteError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of every failure the framework can surface to a caller.
///
/// `Invocation` and `Business` travel inside an envelope; the remaining kinds are
/// raised by transports when a condition occurs outside the envelope channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Invocation,
    Business,
    Authentication,
    NotFound,
    Technical,
}

impl ErrorKind {
    pub fn is_transport_boundary(&self) -> bool {
        matches!(
            self,
            ErrorKind::Authentication | ErrorKind::NotFound | ErrorKind::Technical
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Invocation => "invocation",
            ErrorKind::Business => "business",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Technical => "technical",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    pub frames: Vec<StackFrame>,
}

impl RpcError {
    /// Creates an error, recording the caller's location as the first frame.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RpcError {
            kind,
            message: message.into(),
            frames: vec![StackFrame::caller()],
        }
    }

    pub fn with_frames(kind: ErrorKind, message: impl Into<String>, frames: Vec<StackFrame>) -> Self {
        RpcError {
            kind,
            message: message.into(),
            frames,
        }
    }

    #[track_caller]
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invocation, message)
    }

    #[track_caller]
    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, message)
    }

    #[track_caller]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[track_caller]
    pub fn technical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Technical, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Re-labels the error while keeping its message and frames.
    pub fn into_kind(self, kind: ErrorKind) -> Self {
        RpcError { kind, ..self }
    }

    pub fn push_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        RpcError::invocation(format!("JSON error: {}", err))
    }
}

impl From<RouteError> for RpcError {
    #[track_caller]
    fn from(err: RouteError) -> Self {
        RpcError::invocation(err.to_string())
    }
}

/// Application code returning `anyhow::Result` fails with a business error.
impl From<anyhow::Error> for RpcError {
    #[track_caller]
    fn from(err: anyhow::Error) -> Self {
        RpcError::business(format!("{:#}", err))
    }
}
