use std::collections::HashMap;

use tokio::sync::RwLock;

use autoquote_core::domain::assignment::AssignmentRecord;
use autoquote_core::domain::params::{CarrierCode, JobId};

use super::{AssignmentRepository, AssignmentSummaryRow, RepositoryError};

#[derive(Default)]
pub struct InMemoryAssignmentRepository {
    records: RwLock<HashMap<String, AssignmentRecord>>,
}

impl InMemoryAssignmentRepository {
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn append(&self, record: AssignmentRecord) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(record.job_id.as_str()) {
            return Ok(false);
        }
        records.insert(record.job_id.0.clone(), record);
        Ok(true)
    }

    async fn find_by_job(
        &self,
        job_id: &JobId,
    ) -> Result<Option<AssignmentRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(job_id.as_str()).cloned())
    }

    async fn list_for_carrier(
        &self,
        carrier: &CarrierCode,
        limit: Option<u32>,
    ) -> Result<Vec<AssignmentRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<AssignmentRecord> =
            records.values().filter(|record| &record.carrier_code == carrier).cloned().collect();
        matching.sort_by(|left, right| {
            right.recorded_at.cmp(&left.recorded_at).then_with(|| left.job_id.0.cmp(&right.job_id.0))
        });
        if let Some(limit) = limit {
            matching.truncate(limit as usize);
        }
        Ok(matching)
    }

    async fn summarize(
        &self,
        carrier: Option<&CarrierCode>,
    ) -> Result<Vec<AssignmentSummaryRow>, RepositoryError> {
        let records = self.records.read().await;
        Ok(AssignmentSummaryRow::tally(
            records
                .values()
                .filter(|record| carrier.map_or(true, |code| &record.carrier_code == code)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use autoquote_core::domain::assignment::{AssignmentOutcome, AssignmentRecord};
    use autoquote_core::domain::params::{CarrierCode, JobId};
    use autoquote_core::domain::result::QuoteErrorKind;
    use autoquote_core::domain::routing::{AbTestGroup, AgentType};

    use super::InMemoryAssignmentRepository;
    use crate::repositories::AssignmentRepository;

    fn record(job_id: &str, agent_type: AgentType, outcome: AssignmentOutcome) -> AssignmentRecord {
        AssignmentRecord {
            job_id: JobId(job_id.to_string()),
            carrier_code: CarrierCode::new("progressive"),
            agent_type,
            primary_agent: AgentType::BrowserUse,
            fallback_used: agent_type != AgentType::BrowserUse,
            ab_test_group: None,
            outcome,
            primary_error: None,
            elapsed_ms: 4_000,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_job_is_ignored() {
        let repo = InMemoryAssignmentRepository::default();
        let first = record("job-1", AgentType::BrowserUse, AssignmentOutcome::Success);

        assert!(repo.append(first.clone()).await.expect("append"));
        assert!(!repo
            .append(AssignmentRecord { outcome: AssignmentOutcome::Cancelled, ..first.clone() })
            .await
            .expect("append duplicate"));

        assert_eq!(repo.len().await, 1);
        assert_eq!(repo.find_by_job(&first.job_id).await.expect("find"), Some(first));
    }

    #[tokio::test]
    async fn tally_matches_sql_summary_semantics() {
        let repo = InMemoryAssignmentRepository::default();
        repo.append(record("job-1", AgentType::BrowserUse, AssignmentOutcome::Success))
            .await
            .expect("append");
        repo.append(record(
            "job-2",
            AgentType::Skyvern,
            AssignmentOutcome::Failed { kind: QuoteErrorKind::Unknown },
        ))
        .await
        .expect("append");
        repo.append(AssignmentRecord {
            ab_test_group: Some(AbTestGroup::Treatment),
            ..record("job-3", AgentType::BrowserUse, AssignmentOutcome::Success)
        })
        .await
        .expect("append");

        let summary = repo.summarize(None).await.expect("summarize");
        let arms: Vec<(AgentType, Option<AbTestGroup>, u64)> =
            summary.iter().map(|row| (row.primary_agent, row.ab_test_group, row.total)).collect();
        assert_eq!(
            arms,
            vec![
                (AgentType::BrowserUse, None, 2),
                (AgentType::BrowserUse, Some(AbTestGroup::Treatment), 1),
            ]
        );
        // job-2 fell back to skyvern but is still counted in the browser_use arm.
        assert_eq!(summary[0].fallback_used, 1);
        assert_eq!(summary[0].failed, 1);

        let other = repo.summarize(Some(&CarrierCode::new("travelers"))).await.expect("empty");
        assert!(other.is_empty());
    }
}
