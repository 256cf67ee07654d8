use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::flow::FlowState;

/// Closed set of machine-readable failure causes reported as `errorReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    FocusFailed,
    WindowInvalid,
    WindowMinimized,
    ContainerNotFound,
    ConversationNotFound,
    InputVerifyFailed,
    TimeoutWaitingResponse,
    CopyFailed,
    EmptyResponse,
    InvalidResponseFormat,
    TemplateResponsePersisted,
    LaunchFailed,
}

impl ErrorReason {
    pub const ALL: [ErrorReason; 12] = [
        ErrorReason::FocusFailed,
        ErrorReason::WindowInvalid,
        ErrorReason::WindowMinimized,
        ErrorReason::ContainerNotFound,
        ErrorReason::ConversationNotFound,
        ErrorReason::InputVerifyFailed,
        ErrorReason::TimeoutWaitingResponse,
        ErrorReason::CopyFailed,
        ErrorReason::EmptyResponse,
        ErrorReason::InvalidResponseFormat,
        ErrorReason::TemplateResponsePersisted,
        ErrorReason::LaunchFailed,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FocusFailed => "focus_failed",
            Self::WindowInvalid => "window_invalid",
            Self::WindowMinimized => "window_minimized",
            Self::ContainerNotFound => "container_not_found",
            Self::ConversationNotFound => "conversation_not_found",
            Self::InputVerifyFailed => "input_verify_failed",
            Self::TimeoutWaitingResponse => "timeout_waiting_response",
            Self::CopyFailed => "copy_failed",
            Self::EmptyResponse => "empty_response",
            Self::InvalidResponseFormat => "invalid_response_format",
            Self::TemplateResponsePersisted => "template_response_persisted",
            Self::LaunchFailed => "launch_failed",
        }
    }

    /// Window-level conditions that WindowGuard recovers from locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::FocusFailed | Self::WindowMinimized | Self::WindowInvalid
        )
    }

    /// The target app produced a definitive answer; relaunching cannot change it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidResponseFormat | Self::TemplateResponsePersisted
        )
    }

    /// Short actionable guidance for whoever reads the failed result.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::FocusFailed => "Keep hands off the keyboard and mouse while automation runs",
            Self::WindowInvalid => "The chat window disappeared; make sure the app is installed and can open",
            Self::WindowMinimized => "Do not minimize the chat window during automation",
            Self::ContainerNotFound => "Check that the folder/group name exists in the sidebar",
            Self::ConversationNotFound => "Check that the conversation title exists inside the group",
            Self::InputVerifyFailed => "Avoid typing into the chat input while the prompt is pasted",
            Self::TimeoutWaitingResponse => "The answer took too long; raise timeoutMs or retry later",
            Self::CopyFailed => "Leave the clipboard alone while the answer is copied",
            Self::EmptyResponse => "The answer was empty; retry the escalation",
            Self::InvalidResponseFormat => "The answer did not follow the requested format",
            Self::TemplateResponsePersisted => "The answer repeated the template instead of filling it in",
            Self::LaunchFailed => "The chat app could not be started; check the app name in config",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// A component failed with a known cause, not yet tied to a flow step.
    #[error("{reason}: {message}")]
    Failure {
        reason: ErrorReason,
        message: String,
    },

    /// A flow step failed; `step` is the state the flow could not reach.
    #[error("step {} ({}) failed with {reason}: {message}", .step.number(), .step.label())]
    Step {
        step: FlowState,
        reason: ErrorReason,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command: {0}")]
    Protocol(String),

    #[error("Failed to parse command: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Platform operation failed: {0:#}")]
    Platform(#[from] anyhow::Error),
}

impl DriverError {
    pub fn failure(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self::Failure {
            reason,
            message: message.into(),
        }
    }

    /// The taxonomy value for this error, when it has one.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            Self::Failure { reason, .. } | Self::Step { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn step(&self) -> Option<FlowState> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Attribute this error to a flow step. Errors without a reason take `fallback`.
    /// Errors already attributed keep their original step.
    pub fn at_step(self, step: FlowState, fallback: ErrorReason) -> Self {
        match self {
            Self::Step { .. } => self,
            Self::Failure { reason, message } => Self::Step {
                step,
                reason,
                message,
            },
            other => Self::Step {
                step,
                reason: fallback,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Tag a platform-level `anyhow` failure with a taxonomy reason.
pub trait ReasonExt<T> {
    fn or_reason(self, reason: ErrorReason) -> Result<T>;
}

impl<T> ReasonExt<T> for anyhow::Result<T> {
    fn or_reason(self, reason: ErrorReason) -> Result<T> {
        self.map_err(|e| DriverError::failure(reason, format!("{e:#}")))
    }
}

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is best-effort and the flow continues regardless.
///
/// # Examples
///
/// ```ignore
/// use chat_escalation_driver::error::ResultExt;
///
/// // Put the user's clipboard back, but never fail the flow over it
/// desktop.set_clipboard_text(&original).warn_on_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}
