use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ToolNotFound,
    CommandFailed,
    NoDevicesFound,
    ArtifactReadError,
    StorageWriteError,
    Validation,
    System,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "ERR_TOOL_NOT_FOUND",
            ErrorKind::CommandFailed => "ERR_COMMAND_FAILED",
            ErrorKind::NoDevicesFound => "ERR_NO_DEVICES",
            ErrorKind::ArtifactReadError => "ERR_ARTIFACT_READ",
            ErrorKind::StorageWriteError => "ERR_STORAGE_WRITE",
            ErrorKind::Validation => "ERR_VALIDATION",
            ErrorKind::System => "ERR_SYSTEM",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn of_kind(kind: ErrorKind, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(kind.code(), message, trace_id)
    }

    pub fn tool_not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::ToolNotFound, message, trace_id)
    }

    pub fn command_failed(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::CommandFailed, message, trace_id)
    }

    pub fn no_devices(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::NoDevicesFound, message, trace_id)
    }

    pub fn artifact_read(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::ArtifactReadError, message, trace_id)
    }

    pub fn storage_write(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::StorageWriteError, message, trace_id)
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::Validation, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::of_kind(ErrorKind::System, message, trace_id)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.code == kind.code()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
