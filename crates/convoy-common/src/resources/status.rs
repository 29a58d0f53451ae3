use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress stage reported by migration, backup, restore and clone objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStage {
    #[default]
    Initial,
    Volumes,
    Applications,
    Final,
}

/// Outcome reported alongside a [`TransferStage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    #[default]
    Pending,
    InProgress,
    Successful,
    PartialSuccess,
    Failed,
}

impl TransferState {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferState::Successful | TransferState::PartialSuccess)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransferState::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    #[serde(default)]
    pub stage: TransferStage,

    #[serde(default)]
    pub status: TransferState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_timestamp: Option<DateTime<Utc>>,
}

impl TransferStatus {
    /// Final stage with a successful (or partially successful) outcome.
    pub fn is_complete(&self) -> bool {
        self.stage == TransferStage::Final && self.status.is_success()
    }

    pub fn completed() -> Self {
        Self {
            stage: TransferStage::Final,
            status: TransferState::Successful,
            reason: None,
            finish_timestamp: Some(Utc::now()),
        }
    }
}

/// Completion check over an optional status, as stored objects start without one.
pub fn transfer_complete(status: &Option<TransferStatus>) -> bool {
    status.as_ref().is_some_and(TransferStatus::is_complete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_requires_final_stage() {
        let mut status = TransferStatus {
            stage: TransferStage::Applications,
            status: TransferState::Successful,
            ..Default::default()
        };
        assert!(!status.is_complete());

        status.stage = TransferStage::Final;
        assert!(status.is_complete());

        status.status = TransferState::PartialSuccess;
        assert!(status.is_complete());

        status.status = TransferState::Failed;
        assert!(!status.is_complete());
        assert!(!transfer_complete(&None));
    }
}
