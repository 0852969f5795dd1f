// SPDX-License-Identifier: GPL-3.0-or-later
use std::time::Duration;

use syncarr_application::{ExtractorError, ImageError, MediaServerError};
use thiserror::Error;

/// Everything a task body can fail with, classified for the retry policy.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),
    #[error("remote content error: {0}")]
    RemoteContent(String),
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
    #[error("task exceeded its run time of {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl TaskError {
    pub fn infra(err: impl std::fmt::Display) -> Self {
        Self::TransientInfra(err.to_string())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidTask(msg.into())
    }

    /// Permanent errors never get another attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::RemoteContent(_) | Self::InvalidTask(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientInfra(_) => "transient_infra",
            Self::RemoteContent(_) => "remote_content",
            Self::ToolExecution(_) => "tool_execution",
            Self::Timeout(_) => "timeout",
            Self::InvalidTask(_) => "invalid_task",
            Self::Unclassified(_) => "unclassified",
        }
    }
}

impl From<ExtractorError> for TaskError {
    fn from(err: ExtractorError) -> Self {
        match err {
            ExtractorError::RemoteContent(msg) => Self::RemoteContent(msg),
            other => Self::ToolExecution(other.to_string()),
        }
    }
}

impl From<MediaServerError> for TaskError {
    fn from(err: MediaServerError) -> Self {
        Self::TransientInfra(err.to_string())
    }
}

impl From<ImageError> for TaskError {
    fn from(err: ImageError) -> Self {
        if err.is_permanent() {
            Self::RemoteContent(err.to_string())
        } else {
            Self::TransientInfra(err.to_string())
        }
    }
}
