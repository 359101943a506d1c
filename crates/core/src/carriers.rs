use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::params::CarrierCode;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierProfile {
    pub display_name: String,
    pub portal_url: String,
}

/// Carrier registry consulted by adapters to find the portal for a code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarrierDirectory {
    carriers: BTreeMap<CarrierCode, CarrierProfile>,
}

impl Default for CarrierDirectory {
    fn default() -> Self {
        Self::empty()
            .with_carrier(
                "progressive",
                CarrierProfile {
                    display_name: "Progressive".to_string(),
                    portal_url: "https://agents.progressive.com".to_string(),
                },
            )
            .with_carrier(
                "travelers",
                CarrierProfile {
                    display_name: "Travelers".to_string(),
                    portal_url: "https://agent.travelers.com".to_string(),
                },
            )
    }
}

impl CarrierDirectory {
    pub fn empty() -> Self {
        Self { carriers: BTreeMap::new() }
    }

    pub fn with_carrier(mut self, code: impl Into<CarrierCode>, profile: CarrierProfile) -> Self {
        self.insert(code, profile);
        self
    }

    pub fn insert(&mut self, code: impl Into<CarrierCode>, profile: CarrierProfile) {
        self.carriers.insert(code.into(), profile);
    }

    pub fn get(&self, code: &CarrierCode) -> Option<&CarrierProfile> {
        self.carriers.get(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CarrierCode, &CarrierProfile)> {
        self.carriers.iter()
    }

    pub fn len(&self) -> usize {
        self.carriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carriers.is_empty()
    }
}
