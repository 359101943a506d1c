use autoquote_core::domain::params::CarrierCode;
use autoquote_db::{AssignmentRepository, AssignmentSummaryRow, SqlAssignmentRepository};
use serde_json::json;

use crate::commands::{current_thread_runtime, load_config, open_database, CommandResult, Failure};

pub fn run(carrier: Option<&str>) -> CommandResult {
    let carrier = carrier.map(CarrierCode::new);
    match summarize(carrier.as_ref()) {
        Ok(rows) => {
            let scope = carrier.as_ref().map(CarrierCode::as_str).unwrap_or("all carriers");
            let data = json!({
                "carrier": carrier.as_ref().map(CarrierCode::as_str),
                "cohorts": rows,
            });
            CommandResult::success_with_data("report", render_message(scope, &rows), Some(data))
        }
        Err(failure) => failure.into_result("report"),
    }
}

fn summarize(carrier: Option<&CarrierCode>) -> Result<Vec<AssignmentSummaryRow>, Failure> {
    let config = load_config()?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = open_database(&config).await?;
        let repository = SqlAssignmentRepository::new(pool.clone());
        let rows = repository
            .summarize(carrier)
            .await
            .map_err(|error| Failure::new("db_query", error.to_string(), 4))?;
        pool.close().await;
        Ok::<Vec<AssignmentSummaryRow>, Failure>(rows)
    })
}

fn render_message(scope: &str, rows: &[AssignmentSummaryRow]) -> String {
    if rows.is_empty() {
        return format!("no assignments recorded for {scope}");
    }

    let mut lines = vec![format!("assignment summary for {scope}:")];
    for row in rows {
        lines.push(format!(
            "  - {} [{}]: {} job(s), {:.1}% success, {} failed, {} cancelled, {} fallback, mean {:.0} ms",
            row.primary_agent,
            row.ab_test_group.map(|group| group.as_str()).unwrap_or("no experiment"),
            row.total,
            row.success_rate() * 100.0,
            row.failed,
            row.cancelled,
            row.fallback_used,
            row.mean_elapsed_ms
        ));
    }
    lines.join("\n")
}
