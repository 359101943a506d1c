use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::params::CarrierCode;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    BrowserUse,
    Skyvern,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BrowserUse => "browser_use",
            Self::Skyvern => "skyvern",
        }
    }

    /// The alternate backend used for A/B treatment routing.
    pub fn other(self) -> Self {
        match self {
            Self::BrowserUse => Self::Skyvern,
            Self::Skyvern => Self::BrowserUse,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "browser_use" | "browseruse" => Ok(Self::BrowserUse),
            "skyvern" => Ok(Self::Skyvern),
            other => Err(DomainError::UnknownAgentType(other.to_string())),
        }
    }
}

/// Probability, in whole percent, of routing a job to the non-primary agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u8")]
pub struct AbTestSplit(u8);

impl AbTestSplit {
    pub const NONE: Self = Self(0);
    pub const ALWAYS: Self = Self(100);

    pub fn new(percent: u16) -> Result<Self, DomainError> {
        if percent > 100 {
            return Err(DomainError::InvalidAbTestSplit(percent));
        }
        Ok(Self(percent as u8))
    }

    pub fn clamped(percent: u16) -> Self {
        Self(percent.min(100) as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn is_disabled(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u16> for AbTestSplit {
    type Error = DomainError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AbTestSplit> for u8 {
    fn from(value: AbTestSplit) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestGroup {
    Control,
    Treatment,
}

impl AbTestGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Treatment => "treatment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "control" => Some(Self::Control),
            "treatment" => Some(Self::Treatment),
            _ => None,
        }
    }
}

/// Routing policy for one carrier, or the global default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub primary_agent: AgentType,
    pub fallback_agent: Option<AgentType>,
    #[serde(default)]
    pub ab_test_split: AbTestSplit,
}

impl AgentConfig {
    pub fn new(primary_agent: AgentType) -> Self {
        Self { primary_agent, fallback_agent: None, ab_test_split: AbTestSplit::NONE }
    }

    pub fn with_fallback(mut self, fallback_agent: AgentType) -> Self {
        self.fallback_agent = Some(fallback_agent);
        self
    }

    pub fn with_split(mut self, split: AbTestSplit) -> Self {
        self.ab_test_split = split;
        self
    }

    /// Every agent a job under this policy could touch.
    pub fn referenced_agents(&self) -> BTreeSet<AgentType> {
        let mut agents = BTreeSet::from([self.primary_agent]);
        if let Some(fallback) = self.fallback_agent {
            agents.insert(fallback);
        }
        if !self.ab_test_split.is_disabled() {
            agents.insert(self.primary_agent.other());
        }
        agents
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(AgentType::BrowserUse).with_fallback(AgentType::Skyvern)
    }
}

/// Two-level lookup: carrier override, else the injected default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTable {
    default: AgentConfig,
    carriers: BTreeMap<CarrierCode, AgentConfig>,
}

impl RoutingTable {
    pub fn new(default: AgentConfig) -> Self {
        Self { default, carriers: BTreeMap::new() }
    }

    pub fn with_carrier(mut self, carrier: impl Into<CarrierCode>, config: AgentConfig) -> Self {
        self.carriers.insert(carrier.into(), config);
        self
    }

    pub fn resolve(&self, carrier: &CarrierCode) -> &AgentConfig {
        self.carriers.get(carrier).unwrap_or(&self.default)
    }

    pub fn has_override(&self, carrier: &CarrierCode) -> bool {
        self.carriers.contains_key(carrier)
    }

    pub fn default_config(&self) -> &AgentConfig {
        &self.default
    }

    pub fn carriers(&self) -> impl Iterator<Item = (&CarrierCode, &AgentConfig)> {
        self.carriers.iter()
    }

    pub fn referenced_agents(&self) -> BTreeSet<AgentType> {
        let mut agents = self.default.referenced_agents();
        for config in self.carriers.values() {
            agents.extend(config.referenced_agents());
        }
        agents
    }
}
