use std::sync::{Arc, Mutex};

use tracing::info;

use crate::domain::assignment::AssignmentRecord;

/// Append-only destination for assignment records.
///
/// `record` is fire-and-forget: implementations must not block the caller
/// and must swallow their own failures. Recording the same job id twice is a
/// no-op.
pub trait AssignmentSink: Send + Sync {
    fn record(&self, record: AssignmentRecord);
}

#[derive(Clone, Default)]
pub struct InMemoryAssignmentSink {
    records: Arc<Mutex<Vec<AssignmentRecord>>>,
}

impl InMemoryAssignmentSink {
    pub fn records(&self) -> Vec<AssignmentRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AssignmentSink for InMemoryAssignmentSink {
    fn record(&self, record: AssignmentRecord) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.iter().any(|existing| existing.job_id == record.job_id) {
            return;
        }
        records.push(record);
    }
}

/// Writes each record as a structured log event only.
#[derive(Clone, Debug, Default)]
pub struct TracingAssignmentSink;

impl AssignmentSink for TracingAssignmentSink {
    fn record(&self, record: AssignmentRecord) {
        info!(
            event_name = "quote.assignment.recorded",
            job_id = %record.job_id,
            carrier_code = %record.carrier_code,
            agent_type = %record.agent_type,
            primary_agent = %record.primary_agent,
            fallback_used = record.fallback_used,
            ab_test_group = record.ab_test_group.map(|group| group.as_str()).unwrap_or("none"),
            outcome = record.outcome.as_str(),
            error_kind = record.outcome.error_kind().map(|kind| kind.as_str()).unwrap_or("none"),
            elapsed_ms = record.elapsed_ms,
            "assignment recorded"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::{
        assignment_log::{AssignmentSink, InMemoryAssignmentSink},
        domain::{
            assignment::{AssignmentOutcome, AssignmentRecord},
            params::{CarrierCode, JobId},
            routing::{AbTestGroup, AgentType},
        },
    };

    fn record(job_id: &str, outcome: AssignmentOutcome) -> AssignmentRecord {
        AssignmentRecord {
            job_id: JobId(job_id.to_owned()),
            carrier_code: CarrierCode::new("progressive"),
            agent_type: AgentType::BrowserUse,
            primary_agent: AgentType::BrowserUse,
            fallback_used: false,
            ab_test_group: Some(AbTestGroup::Control),
            outcome,
            primary_error: None,
            elapsed_ms: 1_250,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn in_memory_sink_keeps_records_in_arrival_order() {
        let sink = InMemoryAssignmentSink::default();
        sink.record(record("job-1", AssignmentOutcome::Success));
        sink.record(record("job-2", AssignmentOutcome::Cancelled));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].job_id.as_str(), "job-1");
        assert_eq!(records[1].outcome, AssignmentOutcome::Cancelled);
    }

    #[test]
    fn recording_the_same_job_twice_is_a_no_op() {
        let sink = InMemoryAssignmentSink::default();
        sink.record(record("job-1", AssignmentOutcome::Success));
        sink.record(record("job-1", AssignmentOutcome::Cancelled));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AssignmentOutcome::Success);
    }
}
