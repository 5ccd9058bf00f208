use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;

/// Why a command attempt did not succeed. Only `Timeout` and
/// `ResponseMismatch` are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ResponseMismatch,
    Transport,
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::ResponseMismatch)
    }
}

/// Outcome of one executed command (after retries, if any).
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command: String,
    /// Trimmed response text; `None` when nothing arrived.
    pub response: Option<String>,
    pub success: bool,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub duration: Duration,
    pub protocol: String,
    pub session_id: Uuid,
    pub failure: Option<FailureKind>,
    pub failure_reason: Option<String>,
    /// Regex capture groups, named preferred over numbered.
    pub captured_groups: Option<HashMap<String, String>>,
    /// Attempts actually made (1 = no retries were needed).
    pub attempts: u32,
}

impl CommandResult {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captured_groups
            .as_ref()
            .and_then(|g| g.get(name))
            .map(String::as_str)
    }

    /// Boundary error for a failed result, for callers that propagate
    /// instead of reporting.
    pub fn to_error(&self) -> Option<crate::Error> {
        if self.success {
            return None;
        }
        match self.failure {
            Some(FailureKind::Timeout) => Some(crate::Error::CommandTimeout {
                command: self.command.clone(),
                timeout_ms: self.duration.as_millis() as u64,
            }),
            _ => Some(crate::Error::CommandFailed {
                reason: self
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "command failed".to_string()),
            }),
        }
    }
}

/// The three phases of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Start,
    Test,
    Stop,
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowPhase::Start => write!(f, "start"),
            WorkflowPhase::Test => write!(f, "test"),
            WorkflowPhase::Stop => write!(f, "stop"),
        }
    }
}

/// Per-phase results of a workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: WorkflowPhase,
    pub success: bool,
    pub results: Vec<CommandResult>,
    /// Commands skipped because an earlier command in the phase failed.
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub success: bool,
    pub total_duration: Duration,
    pub command_count: usize,
    /// First phase that failed, if any.
    pub failed_phase: Option<WorkflowPhase>,
}

impl WorkflowSummary {
    pub fn describe(&self) -> String {
        let verdict = if self.success { "SUCCESS" } else { "FAILED" };
        format!("{} - {} commands", verdict, self.command_count)
    }
}

/// Handler-level open state on a physical port.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Uuid,
    pub port_name: String,
    pub protocol: String,
    pub active: bool,
    pub opened_at: SystemTime,
    pub last_activity: SystemTime,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
}

impl SessionState {
    pub fn new(port_name: impl Into<String>, protocol: impl Into<String>) -> Self {
        let now = SystemTime::now();
        SessionState {
            session_id: Uuid::new_v4(),
            port_name: port_name.into(),
            protocol: protocol.into(),
            active: true,
            opened_at: now,
            last_activity: now,
            commands_succeeded: 0,
            commands_failed: 0,
        }
    }

    pub fn record(&mut self, success: bool) {
        self.last_activity = SystemTime::now();
        if success {
            self.commands_succeeded += 1;
        } else {
            self.commands_failed += 1;
        }
    }
}
