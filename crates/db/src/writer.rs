//! Background persistence for assignment records.
//!
//! The factory hands records to [`AssignmentWriter`] synchronously; a spawned
//! task drains them into an [`AssignmentRepository`]. Neither a full buffer
//! nor a failed write is visible to the caller.

use std::sync::Arc;

use autoquote_core::assignment_log::AssignmentSink;
use autoquote_core::domain::assignment::AssignmentRecord;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::repositories::AssignmentRepository;

#[derive(Clone)]
pub struct AssignmentWriter {
    sender: mpsc::Sender<AssignmentRecord>,
}

impl AssignmentWriter {
    /// Starts the drain task. It finishes once every writer clone is dropped
    /// and the buffer is empty.
    pub fn spawn(
        repository: Arc<dyn AssignmentRepository>,
        buffer: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AssignmentRecord>(buffer.max(1));

        let drain = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                let job_id = record.job_id.clone();
                match repository.append(record).await {
                    Ok(true) => {}
                    Ok(false) => debug!(
                        event_name = "quote.assignment.duplicate",
                        job_id = %job_id,
                        "assignment already recorded"
                    ),
                    Err(error) => warn!(
                        event_name = "quote.assignment.write_failed",
                        job_id = %job_id,
                        error = %error,
                        "failed to persist assignment record"
                    ),
                }
            }
        });

        (Self { sender }, drain)
    }
}

impl AssignmentSink for AssignmentWriter {
    fn record(&self, record: AssignmentRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => warn!(
                event_name = "quote.assignment.dropped",
                job_id = %record.job_id,
                reason = "buffer_full",
                "assignment record dropped"
            ),
            Err(TrySendError::Closed(record)) => warn!(
                event_name = "quote.assignment.dropped",
                job_id = %record.job_id,
                reason = "writer_closed",
                "assignment record dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use autoquote_core::assignment_log::AssignmentSink;
    use autoquote_core::domain::assignment::{AssignmentOutcome, AssignmentRecord};
    use autoquote_core::domain::params::{CarrierCode, JobId};
    use autoquote_core::domain::routing::AgentType;

    use super::AssignmentWriter;
    use crate::repositories::{
        AssignmentRepository, AssignmentSummaryRow, InMemoryAssignmentRepository, RepositoryError,
    };

    fn record(job_id: &str) -> AssignmentRecord {
        AssignmentRecord {
            job_id: JobId(job_id.to_string()),
            carrier_code: CarrierCode::new("travelers"),
            agent_type: AgentType::Skyvern,
            primary_agent: AgentType::Skyvern,
            fallback_used: false,
            ab_test_group: None,
            outcome: AssignmentOutcome::Success,
            primary_error: None,
            elapsed_ms: 900,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drains_records_into_repository_on_shutdown() {
        let repo = Arc::new(InMemoryAssignmentRepository::default());
        let (writer, drain) = AssignmentWriter::spawn(repo.clone(), 8);

        writer.record(record("job-1"));
        writer.record(record("job-2"));
        writer.record(record("job-1"));
        drop(writer);
        drain.await.expect("drain task");

        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let repo = Arc::new(InMemoryAssignmentRepository::default());
        let (writer, drain) = AssignmentWriter::spawn(repo.clone(), 1);

        // The current-thread runtime has not polled the drain task yet.
        writer.record(record("job-1"));
        writer.record(record("job-2"));
        drop(writer);
        drain.await.expect("drain task");

        assert_eq!(repo.len().await, 1);
        assert!(repo.find_by_job(&JobId("job-1".to_string())).await.expect("find").is_some());
    }

    struct FailingRepository;

    #[async_trait]
    impl AssignmentRepository for FailingRepository {
        async fn append(&self, _record: AssignmentRecord) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Decode("disk full".to_string()))
        }

        async fn find_by_job(
            &self,
            _job_id: &JobId,
        ) -> Result<Option<AssignmentRecord>, RepositoryError> {
            Ok(None)
        }

        async fn list_for_carrier(
            &self,
            _carrier: &CarrierCode,
            _limit: Option<u32>,
        ) -> Result<Vec<AssignmentRecord>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn summarize(
            &self,
            _carrier: Option<&CarrierCode>,
        ) -> Result<Vec<AssignmentSummaryRow>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_the_drain() {
        let (writer, drain) = AssignmentWriter::spawn(Arc::new(FailingRepository), 4);

        writer.record(record("job-1"));
        writer.record(record("job-2"));
        drop(writer);

        drain.await.expect("drain task survives write errors");
    }
}
