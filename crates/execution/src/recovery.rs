//! Error-recovery collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// What the recovery collaborator is told about a failed subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    /// Failed subtask
    pub task_id: String,
    /// Strategy running the subtask
    pub strategy: String,
    /// Depth of the subtask's branch
    pub depth: usize,
    /// Attempts made, including retries
    pub attempts: u32,
    /// Whether the last attempt timed out
    pub timed_out: bool,
    /// Whether the failure would abort the enclosing batch
    pub critical: bool,
}

/// The collaborator's verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    /// Treat the subtask as succeeded
    pub success: bool,
    /// What the collaborator did
    #[serde(default)]
    pub action: Option<String>,
    /// Replacement result
    #[serde(default)]
    pub result: Option<Value>,
    /// Delay in milliseconds before continuing
    #[serde(default)]
    pub delay: Option<u64>,
}

impl RecoveryOutcome {
    /// Recovered with a replacement result.
    pub fn recovered(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            ..Default::default()
        }
    }

    /// Not recovered.
    pub fn unrecovered() -> Self {
        Self::default()
    }

    /// Delay to apply before continuing.
    pub fn delay(&self) -> Option<Duration> {
        self.delay.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

/// Gets first refusal on subtask failures.
#[async_trait]
pub trait ErrorRecovery: Send + Sync {
    /// Try to recover from `error`.
    async fn recover(&self, error: &str, request: &RecoveryRequest) -> anyhow::Result<RecoveryOutcome>;
}
