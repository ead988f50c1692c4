//! Serializable projection of framework errors.
//!
//! Only the message, the kind and the captured frames cross a process boundary.
//! The receiving side rebuilds an error of the matching kind; the concrete error
//! type of the raising side is never transported.

use crate::error::{ErrorKind, RpcError};
use serde::{Deserialize, Serialize};
use std::panic::Location;

pub const DEFAULT_BUSINESS_MESSAGE: &str = "Business exception raised by service";
pub const DEFAULT_INVOCATION_MESSAGE: &str = "Invocation failed";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub symbol: String,
}

impl StackFrame {
    pub fn new(file: impl Into<String>, line: u32, symbol: impl Into<String>) -> Self {
        StackFrame {
            file: file.into(),
            line,
            symbol: symbol.into(),
        }
    }

    /// Frame for the location that called the current `#[track_caller]` chain.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        StackFrame {
            file: location.file().to_string(),
            line: location.line(),
            symbol: String::new(),
        }
    }
}

/// The two kinds that survive marshaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    Business,
    Invocation,
}

impl ExceptionKind {
    pub fn default_message(&self) -> &'static str {
        match self {
            ExceptionKind::Business => DEFAULT_BUSINESS_MESSAGE,
            ExceptionKind::Invocation => DEFAULT_INVOCATION_MESSAGE,
        }
    }
}

impl From<ErrorKind> for ExceptionKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Business => ExceptionKind::Business,
            // Everything raised by the framework or a transport is technical.
            ErrorKind::Invocation
            | ErrorKind::Authentication
            | ErrorKind::NotFound
            | ErrorKind::Technical => ExceptionKind::Invocation,
        }
    }
}

impl From<ExceptionKind> for ErrorKind {
    fn from(kind: ExceptionKind) -> Self {
        match kind {
            ExceptionKind::Business => ErrorKind::Business,
            ExceptionKind::Invocation => ErrorKind::Invocation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDataHolder {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ExceptionKind,
    #[serde(rename = "stackTrace", default)]
    pub frames: Vec<StackFrame>,
}

/// Projects a live error into its wire form.
pub fn to_holder(error: &RpcError) -> ExceptionDataHolder {
    let kind = ExceptionKind::from(error.kind());
    let message = if error.message().trim().is_empty() {
        kind.default_message().to_string()
    } else {
        error.message().to_string()
    };

    ExceptionDataHolder {
        message,
        kind,
        frames: error.frames().to_vec(),
    }
}

/// Rebuilds a live error of the matching kind from its wire form.
pub fn from_holder(holder: ExceptionDataHolder) -> RpcError {
    let message = if holder.message.trim().is_empty() {
        holder.kind.default_message().to_string()
    } else {
        holder.message
    };
    RpcError::with_frames(holder.kind.into(), message, holder.frames)
}

impl From<&RpcError> for ExceptionDataHolder {
    fn from(error: &RpcError) -> Self {
        to_holder(error)
    }
}

impl From<ExceptionDataHolder> for RpcError {
    fn from(holder: ExceptionDataHolder) -> Self {
        from_holder(holder)
    }
}
