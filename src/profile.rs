use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};

/// Identity used both to query the remote service and to key the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
}

impl Query {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, national_id: impl Into<String>) -> Self {
        Query {
            first_name: first_name.into(),
            last_name: last_name.into(),
            national_id: national_id.into(),
        }
    }

    /// `first-last-id`. Different field splits joining to the same string collide.
    pub fn cache_key(&self) -> String {
        format!("{}-{}-{}", self.first_name, self.last_name, self.national_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub country: String,
    pub locality: String,
    pub zip: String,
    pub street: String,
}

/// A fully built resolution result. Fields that could not be extracted hold
/// their empty default, never a partial value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub companies: BTreeSet<String>,
    pub businesses: Vec<String>,
    #[serde(rename = "livingWith", alias = "living_with")]
    pub living_with: Vec<String>,
    #[serde(rename = "url")]
    pub source_url: String,
}

impl Profile {
    /// Human readable lines, one per populated field.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(address) = &self.address {
            lines.push(format!("address: {}, {}, {}", address.street, address.locality, address.zip));
        }
        if !self.living_with.is_empty() {
            lines.push(format!("living with: {}", self.living_with.join("\n             ")));
        }
        if let Some(phone) = &self.phone {
            lines.push(format!("phone: {}", phone));
        }
        if !self.companies.is_empty() {
            lines.push(format!("companies: {}", self.companies.iter().cloned().collect::<Vec<_>>().join(", ")));
        }
        if !self.businesses.is_empty() {
            lines.push(format!("businesses: {}", self.businesses.join(", ")));
        }
        lines.push(format!("source: {}", self.source_url));
        lines
    }
}
