use thiserror::Error;

use crate::domain::params::JobId;
use crate::domain::routing::AgentType;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown agent type `{0}` (expected browser_use|skyvern)")]
    UnknownAgentType(String),
    #[error("ab test split must be within 0..=100, got {0}")]
    InvalidAbTestSplit(u16),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures of the factory itself. Quote failures are not errors here; they
/// travel inside `QuoteResult`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("quote job {job_id} was cancelled while {active_agent} was running")]
    Cancelled { job_id: JobId, active_agent: AgentType },
}

impl FactoryError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Cancelled { .. } => "The quote request was cancelled before it finished.",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::params::JobId;
    use crate::domain::routing::AgentType;
    use crate::errors::{DomainError, FactoryError};

    #[test]
    fn cancelled_error_names_job_and_agent() {
        let error = FactoryError::Cancelled {
            job_id: JobId("job-7".to_owned()),
            active_agent: AgentType::Skyvern,
        };

        assert_eq!(error.error_class(), "cancelled");
        assert!(error.to_string().contains("job-7"));
        assert!(error.to_string().contains("skyvern"));
    }

    #[test]
    fn split_error_is_actionable() {
        assert_eq!(
            DomainError::InvalidAbTestSplit(140).to_string(),
            "ab test split must be within 0..=100, got 140"
        );
    }
}
