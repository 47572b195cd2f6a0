// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types.
//!
//! Every failure the engine catches ends up as a [`PersistError`]. The
//! [`FaultKind`] of an error is what gets logged and counted; the error itself
//! is what subscribers of the fault channel and `on_flush_fail` receive.

use thiserror::Error;

/// Failure raised by a storage driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver could not be brought up (async initialization rejected)
    #[error("driver unavailable: {0}")]
    Unavailable(String),
    /// Per-operation I/O fault
    #[error("storage backend error: {0}")]
    Backend(String),
    /// The driver operation panicked instead of returning an error
    #[error("driver operation panicked: {0}")]
    Panicked(String),
}

/// Failure raised by a serialize or unserialize step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Failure raised by a wake-up target refusing a hydrated value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct WakeUpError(pub String);

impl WakeUpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Coarse classification used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    DriverUnavailable,
    ReadFailure,
    WriteFailure,
    ConversionFailure,
    HookFailure,
}

impl FaultKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DriverUnavailable => "driver_unavailable",
            Self::ReadFailure => "read_failure",
            Self::WriteFailure => "write_failure",
            Self::ConversionFailure => "conversion_failure",
            Self::HookFailure => "hook_failure",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure observed by a synchronization engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("failed to initialize persistent driver: {0}")]
    DriverUnavailable(DriverError),

    #[error("failed to read value from persistent driver: {0}")]
    Read(DriverError),

    #[error("failed to write data to persistent driver: {0}")]
    Write(DriverError),

    #[error("failed to serialize input before write to persistent driver: {0}")]
    Serialize(CodecError),

    #[error("failed to unserialize output from persistent driver: {0}")]
    Unserialize(CodecError),

    #[error("wake-up target rejected hydrated value: {0}")]
    WakeUp(WakeUpError),

    #[error("hook `{hook}` panicked: {message}")]
    Hook { hook: &'static str, message: String },

    /// A flush task died before settling (panic outside the driver call)
    #[error("flush task aborted: {0}")]
    Aborted(String),
}

impl PersistError {
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::DriverUnavailable(_) => FaultKind::DriverUnavailable,
            Self::Read(_) => FaultKind::ReadFailure,
            Self::Write(_) | Self::Aborted(_) => FaultKind::WriteFailure,
            Self::Serialize(_) | Self::Unserialize(_) | Self::WakeUp(_) => {
                FaultKind::ConversionFailure
            }
            Self::Hook { .. } => FaultKind::HookFailure,
        }
    }
}

/// Result type alias using PersistError.
pub type PersistResult<T> = Result<T, PersistError>;

/// Best-effort message out of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
