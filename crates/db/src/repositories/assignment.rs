use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use autoquote_core::domain::assignment::{AssignmentOutcome, AssignmentRecord};
use autoquote_core::domain::params::{CarrierCode, JobId};
use autoquote_core::domain::result::QuoteErrorKind;
use autoquote_core::domain::routing::{AbTestGroup, AgentType};

use super::{AssignmentRepository, AssignmentSummaryRow, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
        job_id,
        carrier_code,
        agent_type,
        primary_agent,
        fallback_used,
        ab_test_group,
        outcome,
        error_kind,
        primary_error,
        elapsed_ms,
        recorded_at
     FROM quote_assignment";

const SUMMARY_COLUMNS: &str = "SELECT
        primary_agent,
        ab_test_group,
        COUNT(*) AS total,
        SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END) AS succeeded,
        SUM(CASE WHEN outcome = 'failed' THEN 1 ELSE 0 END) AS failed,
        SUM(CASE WHEN outcome = 'cancelled' THEN 1 ELSE 0 END) AS cancelled,
        SUM(fallback_used) AS fallback_used,
        AVG(elapsed_ms) AS mean_elapsed_ms
     FROM quote_assignment";

pub struct SqlAssignmentRepository {
    pool: DbPool,
}

impl SqlAssignmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for SqlAssignmentRepository {
    async fn append(&self, record: AssignmentRecord) -> Result<bool, RepositoryError> {
        let elapsed_ms = i64::try_from(record.elapsed_ms).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "INSERT INTO quote_assignment (
                job_id,
                carrier_code,
                agent_type,
                primary_agent,
                fallback_used,
                ab_test_group,
                outcome,
                error_kind,
                primary_error,
                elapsed_ms,
                recorded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(record.job_id.as_str())
        .bind(record.carrier_code.as_str())
        .bind(record.agent_type.as_str())
        .bind(record.primary_agent.as_str())
        .bind(record.fallback_used)
        .bind(record.ab_test_group.map(AbTestGroup::as_str))
        .bind(record.outcome.as_str())
        .bind(record.outcome.error_kind().map(QuoteErrorKind::as_str))
        .bind(record.primary_error.map(QuoteErrorKind::as_str))
        .bind(elapsed_ms)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_job(
        &self,
        job_id: &JobId,
    ) -> Result<Option<AssignmentRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE job_id = ?"))
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(record_from_row).transpose()
    }

    async fn list_for_carrier(
        &self,
        carrier: &CarrierCode,
        limit: Option<u32>,
    ) -> Result<Vec<AssignmentRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE carrier_code = ? ORDER BY recorded_at DESC, job_id ASC LIMIT ?"
        ))
        .bind(carrier.as_str())
        .bind(limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn summarize(
        &self,
        carrier: Option<&CarrierCode>,
    ) -> Result<Vec<AssignmentSummaryRow>, RepositoryError> {
        let rows = if let Some(carrier) = carrier {
            sqlx::query(&format!(
                "{SUMMARY_COLUMNS}
                 WHERE carrier_code = ?
                 GROUP BY primary_agent, ab_test_group
                 ORDER BY primary_agent ASC, ab_test_group ASC"
            ))
            .bind(carrier.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{SUMMARY_COLUMNS}
                 GROUP BY primary_agent, ab_test_group
                 ORDER BY primary_agent ASC, ab_test_group ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(summary_from_row).collect()
    }
}

fn record_from_row(row: SqliteRow) -> Result<AssignmentRecord, RepositoryError> {
    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let error_kind = row.try_get::<Option<String>, _>("error_kind")?;
    let outcome = AssignmentOutcome::parse(&outcome_raw, error_kind.as_deref()).ok_or_else(|| {
        RepositoryError::Decode(format!(
            "unknown assignment outcome `{outcome_raw}` (error_kind {error_kind:?})"
        ))
    })?;

    let primary_error = row
        .try_get::<Option<String>, _>("primary_error")?
        .map(|value| {
            QuoteErrorKind::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown primary_error `{value}`")))
        })
        .transpose()?;

    let ab_test_group = parse_group(row.try_get("ab_test_group")?)?;

    Ok(AssignmentRecord {
        job_id: JobId(row.try_get("job_id")?),
        carrier_code: CarrierCode::new(row.try_get::<String, _>("carrier_code")?),
        agent_type: parse_agent("agent_type", row.try_get("agent_type")?)?,
        primary_agent: parse_agent("primary_agent", row.try_get("primary_agent")?)?,
        fallback_used: row.try_get("fallback_used")?,
        ab_test_group,
        outcome,
        primary_error,
        elapsed_ms: parse_u64("elapsed_ms", row.try_get("elapsed_ms")?)?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}

fn summary_from_row(row: SqliteRow) -> Result<AssignmentSummaryRow, RepositoryError> {
    Ok(AssignmentSummaryRow {
        primary_agent: parse_agent("primary_agent", row.try_get("primary_agent")?)?,
        ab_test_group: parse_group(row.try_get("ab_test_group")?)?,
        total: parse_u64("total", row.try_get("total")?)?,
        succeeded: parse_u64("succeeded", row.try_get("succeeded")?)?,
        failed: parse_u64("failed", row.try_get("failed")?)?,
        cancelled: parse_u64("cancelled", row.try_get("cancelled")?)?,
        fallback_used: parse_u64("fallback_used", row.try_get("fallback_used")?)?,
        mean_elapsed_ms: row.try_get("mean_elapsed_ms")?,
    })
}

fn parse_agent(column: &str, value: String) -> Result<AgentType, RepositoryError> {
    value.parse().map_err(|_| {
        RepositoryError::Decode(format!("unknown agent type in `{column}`: `{value}`"))
    })
}

fn parse_group(value: Option<String>) -> Result<Option<AbTestGroup>, RepositoryError> {
    value
        .map(|group| {
            AbTestGroup::parse(&group).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown ab_test_group `{group}`"))
            })
        })
        .transpose()
}

fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
