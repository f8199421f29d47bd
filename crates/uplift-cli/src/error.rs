use std::fmt;

use thiserror::Error;

use crate::context::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Internal,
    Precondition,
    Conflict,
    Acquisition,
    Install,
    Restoration,
    /// Upgrade and restore succeeded but the requested restart did not happen.
    RestartFailed,
}

impl ExitKind {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Internal => 1,
            Self::Precondition => 10,
            Self::Conflict => 11,
            Self::Acquisition => 12,
            Self::Install => 13,
            Self::Restoration => 14,
            Self::RestartFailed => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Conflict,
    Acquisition,
    Internal,
}

impl ErrorKind {
    pub fn exit_kind(self) -> ExitKind {
        match self {
            Self::Precondition => ExitKind::Precondition,
            Self::Conflict => ExitKind::Conflict,
            Self::Acquisition => ExitKind::Acquisition,
            Self::Internal => ExitKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Precondition => "precondition failed",
            Self::Conflict => "external state conflict",
            Self::Acquisition => "artifact acquisition failed",
            Self::Internal => "internal error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("{kind} during {stage}: {reason}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub reason: String,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            reason: reason.into(),
        }
    }

    pub fn precondition(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, stage, reason)
    }

    pub fn conflict(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, stage, reason)
    }

    pub fn acquisition(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Acquisition, stage, reason)
    }

    pub fn internal(stage: Stage, err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::Internal, stage, format!("{err:#}"))
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_kind().code()
    }
}
