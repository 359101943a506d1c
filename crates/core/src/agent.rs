use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::params::QuoteExecutionParams;
use crate::domain::result::QuoteResult;
use crate::domain::routing::AgentType;

/// Contract shared by every automation backend.
///
/// `execute_quote` never fails at the language level: expected portal
/// problems come back as a classified `QuoteError` inside the result, and an
/// unanticipated defect comes back as `QuoteErrorKind::Unknown`. It reports
/// progress at least once and calls the params' challenge resolver whenever a
/// human prompt blocks automation.
///
/// `cancel` asks an in-flight `execute_quote` to stop. It must return
/// immediately, may be called any number of times, and is a no-op when
/// nothing is running. The wall-clock ceiling is enforced by the caller.
#[async_trait]
pub trait QuoteAgent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    async fn execute_quote(&self, params: &QuoteExecutionParams) -> QuoteResult;

    fn cancel(&self);
}

/// Produces a fresh agent per attempt, so cancelling one job's adapter can
/// never reach another job running concurrently.
pub trait AgentBuilder: Send + Sync {
    fn build(&self) -> Arc<dyn QuoteAgent>;
}

impl<F> AgentBuilder for F
where
    F: Fn() -> Arc<dyn QuoteAgent> + Send + Sync,
{
    fn build(&self) -> Arc<dyn QuoteAgent> {
        self()
    }
}
