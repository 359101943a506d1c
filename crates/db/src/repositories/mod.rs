use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use autoquote_core::domain::assignment::{AssignmentOutcome, AssignmentRecord};
use autoquote_core::domain::params::{CarrierCode, JobId};
use autoquote_core::domain::routing::{AbTestGroup, AgentType};

pub mod assignment;
pub mod memory;

pub use assignment::SqlAssignmentRepository;
pub use memory::InMemoryAssignmentRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Returns `false` when a record for the same job already exists.
    async fn append(&self, record: AssignmentRecord) -> Result<bool, RepositoryError>;

    async fn find_by_job(&self, job_id: &JobId)
        -> Result<Option<AssignmentRecord>, RepositoryError>;

    /// Most recent first.
    async fn list_for_carrier(
        &self,
        carrier: &CarrierCode,
        limit: Option<u32>,
    ) -> Result<Vec<AssignmentRecord>, RepositoryError>;

    async fn summarize(
        &self,
        carrier: Option<&CarrierCode>,
    ) -> Result<Vec<AssignmentSummaryRow>, RepositoryError>;
}

/// Outcome counts for one routed arm, `(primary_agent, ab_test_group)`.
///
/// Jobs stay in the arm they were routed to even when a fallback engine
/// produced the final result; `fallback_used` counts those.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentSummaryRow {
    pub primary_agent: AgentType,
    pub ab_test_group: Option<AbTestGroup>,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub fallback_used: u64,
    pub mean_elapsed_ms: f64,
}

impl AssignmentSummaryRow {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    /// Groups records into arms ordered by primary agent then group, matching the
    /// SQL summary ordering.
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a AssignmentRecord>) -> Vec<Self> {
        let mut rows: Vec<(Self, u64)> = Vec::new();

        for record in records {
            let position = rows.iter().position(|(row, _)| {
                row.primary_agent == record.primary_agent && row.ab_test_group == record.ab_test_group
            });
            let (row, elapsed_total) = match position {
                Some(index) => &mut rows[index],
                None => {
                    rows.push((Self::empty(record.primary_agent, record.ab_test_group), 0));
                    let last = rows.len() - 1;
                    &mut rows[last]
                }
            };

            row.total += 1;
            match record.outcome {
                AssignmentOutcome::Success => row.succeeded += 1,
                AssignmentOutcome::Failed { .. } => row.failed += 1,
                AssignmentOutcome::Cancelled => row.cancelled += 1,
            }
            if record.fallback_used {
                row.fallback_used += 1;
            }
            *elapsed_total += record.elapsed_ms;
        }

        let mut summary: Vec<Self> = rows
            .into_iter()
            .map(|(mut row, elapsed_total)| {
                row.mean_elapsed_ms = elapsed_total as f64 / row.total as f64;
                row
            })
            .collect();
        summary.sort_by(|left, right| {
            left.primary_agent
                .as_str()
                .cmp(right.primary_agent.as_str())
                .then_with(|| group_key(left.ab_test_group).cmp(group_key(right.ab_test_group)))
        });
        summary
    }

    fn empty(primary_agent: AgentType, ab_test_group: Option<AbTestGroup>) -> Self {
        Self {
            primary_agent,
            ab_test_group,
            total: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            fallback_used: 0,
            mean_elapsed_ms: 0.0,
        }
    }
}

// SQLite sorts NULL first, so the ungrouped cohort leads.
fn group_key(group: Option<AbTestGroup>) -> &'static str {
    group.map(AbTestGroup::as_str).unwrap_or("")
}
