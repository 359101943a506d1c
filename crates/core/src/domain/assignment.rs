use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::params::{CarrierCode, JobId};
use crate::domain::result::{QuoteErrorKind, QuoteOutcome, QuoteResult};
use crate::domain::routing::{AbTestGroup, AgentType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Success,
    Failed { kind: QuoteErrorKind },
    Cancelled,
}

impl AssignmentOutcome {
    pub fn from_result(result: &QuoteResult) -> Self {
        match &result.outcome {
            QuoteOutcome::Success(_) => Self::Success,
            QuoteOutcome::Failure(error) => Self::Failed { kind: error.kind() },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn error_kind(&self) -> Option<QuoteErrorKind> {
        match self {
            Self::Failed { kind } => Some(*kind),
            Self::Success | Self::Cancelled => None,
        }
    }

    /// Inverse of `as_str` + `error_kind`, used when reading stored rows.
    pub fn parse(state: &str, kind: Option<&str>) -> Option<Self> {
        match state.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "cancelled" => Some(Self::Cancelled),
            "failed" => kind.and_then(QuoteErrorKind::parse).map(|kind| Self::Failed { kind }),
            _ => None,
        }
    }
}

/// One row per top-level job, reflecting the effective outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub job_id: JobId,
    pub carrier_code: CarrierCode,
    pub agent_type: AgentType,
    pub primary_agent: AgentType,
    pub fallback_used: bool,
    pub ab_test_group: Option<AbTestGroup>,
    pub outcome: AssignmentOutcome,
    pub primary_error: Option<QuoteErrorKind>,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}
