use crate::commands::{current_thread_runtime, load_config, CommandResult, Failure};
use autoquote_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    match apply() {
        Ok(0) => CommandResult::success("migrate", "database schema is up to date"),
        Ok(applied) => {
            CommandResult::success("migrate", format!("applied {applied} pending migration(s)"))
        }
        Err(failure) => failure.into_result("migrate"),
    }
}

fn apply() -> Result<usize, Failure> {
    let config = load_config()?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;

        let pending = migrations::pending_count(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
        pool.close().await;
        Ok::<usize, Failure>(pending)
    })
}
