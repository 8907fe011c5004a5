use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A structured item extracted from one fetched page
///
/// Records are immutable once built; the sink takes them as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    source_url: String,
    fields: BTreeMap<String, Value>,
    extracted_links: Vec<String>,
    extracted_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        source_url: impl Into<String>,
        fields: BTreeMap<String, Value>,
        extracted_links: Vec<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            fields,
            extracted_links,
            extracted_at: Utc::now(),
        }
    }

    /// URL of the page this record came from
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Links found on the source page, in document order
    pub fn extracted_links(&self) -> &[String] {
        &self.extracted_links
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }
}
