//! Command and result shapes exchanged with the calling server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DriverError, ErrorReason};

/// Driver actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CheckTarget,
    FocusTarget,
    FindContainer,
    SendMessage,
    WaitForResponse,
    GetLastResponse,
    /// Steps 1-10 in one call
    Escalate,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::CheckTarget,
        Action::FocusTarget,
        Action::FindContainer,
        Action::SendMessage,
        Action::WaitForResponse,
        Action::GetLastResponse,
        Action::Escalate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CheckTarget => "check_target",
            Action::FocusTarget => "focus_target",
            Action::FindContainer => "find_container",
            Action::SendMessage => "send_message",
            Action::WaitForResponse => "wait_for_response",
            Action::GetLastResponse => "get_last_response",
            Action::Escalate => "escalate",
        }
    }

    /// Whether the action touches the window and so needs the single-flight gate.
    pub fn needs_gate(&self) -> bool {
        !matches!(self, Action::CheckTarget)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    /// Conversation title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Folder/group holding the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_label: Option<String>,
    /// Prompt text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Correlation id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl Params {
    pub fn require_label(&self) -> Result<&str, DriverError> {
        require(self.label.as_deref(), "label")
    }

    pub fn require_container_label(&self) -> Result<&str, DriverError> {
        require(self.container_label.as_deref(), "containerLabel")
    }

    pub fn require_message(&self) -> Result<&str, DriverError> {
        require(self.message.as_deref(), "message")
    }
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, DriverError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| DriverError::Protocol(format!("missing required param '{name}'")))
}

/// One request from the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    #[serde(default)]
    pub params: Params,
}

impl Command {
    pub fn new(action: Action, params: Params) -> Self {
        Self { action, params }
    }
}

/// One response to the caller. `data.runId` is present on every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
}

impl CommandResult {
    pub fn ok(run_id: &str, mut data: Map<String, Value>) -> Self {
        data.insert("runId".into(), Value::String(run_id.to_string()));
        Self {
            success: true,
            data: Some(Value::Object(data)),
            error: None,
            failed_step: None,
            error_reason: None,
        }
    }

    /// Failure result. Errors with a taxonomy reason also carry its hint.
    pub fn failure(run_id: &str, error: &DriverError) -> Self {
        let mut data = Map::new();
        data.insert("runId".into(), Value::String(run_id.to_string()));
        if let Some(reason) = error.reason() {
            data.insert("hint".into(), Value::String(reason.hint().to_string()));
        }
        Self {
            success: false,
            data: Some(Value::Object(data)),
            error: Some(error.to_string()),
            failed_step: error.step().map(|s| s.number()),
            error_reason: error.reason(),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.data.as_ref()?.get("runId")?.as_str()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}
