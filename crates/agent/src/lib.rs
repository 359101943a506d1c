//! Automation backends for carrier quote portals.
//!
//! Two adapters implement `autoquote_core::QuoteAgent`:
//! - `browser_use` drives an LLM browser agent in a Python subprocess over a
//!   JSON-lines protocol
//! - `skyvern` submits a task to a vision-based RPA service and polls it
//!
//! Both map every failure through the shared error classifier and build a
//! fresh adapter per attempt, so cancelling one job never touches another.

pub mod browser_use;
pub mod extraction;
pub mod skyvern;

use std::sync::Arc;
use std::time::Duration;

use autoquote_core::config::AppConfig;
use autoquote_core::factory::AgentBuilders;
use tokio_util::task::TaskTracker;
use tracing::warn;

pub use browser_use::{BrowserUseAgent, BrowserUseBuilder, BrowserUseSettings};
pub use skyvern::{SkyvernAgent, SkyvernBuilder, SkyvernSettings};

/// Wired builders plus the cleanup requests their agents leave behind.
pub struct AgentBackends {
    pub builders: AgentBuilders,
    background: TaskTracker,
}

impl AgentBackends {
    /// Waits up to `grace` for outstanding remote cancels. Call before the
    /// runtime shuts down.
    pub async fn settle(&self, grace: Duration) {
        self.background.close();
        if tokio::time::timeout(grace, self.background.wait()).await.is_err() {
            warn!(
                event_name = "quote.backends.settle_timeout",
                pending = self.background.len(),
                "remote cancel requests still pending at shutdown"
            );
        }
    }
}

pub fn backends_from_config(config: &AppConfig) -> Result<AgentBackends, reqwest::Error> {
    let carriers = Arc::new(config.carrier_directory());
    let browser_use =
        BrowserUseBuilder::new(BrowserUseSettings::from(&config.browser_use), carriers.clone());
    let skyvern = SkyvernBuilder::new(SkyvernSettings::from(&config.skyvern), carriers)?;
    let background = skyvern.background();
    Ok(AgentBackends {
        builders: AgentBuilders::new(Arc::new(browser_use), Arc::new(skyvern)),
        background,
    })
}

/// Builders for both backends wired from application config.
pub fn builders_from_config(config: &AppConfig) -> Result<AgentBuilders, reqwest::Error> {
    backends_from_config(config).map(|backends| backends.builders)
}
