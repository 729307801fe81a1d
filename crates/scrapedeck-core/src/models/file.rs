//! Scrape artifacts stored by the backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of `GET /files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Contents of a scraped JSON artifact.
///
/// General scrapes carry metadata, headings, links and images; custom and
/// YouTube scrapes put their results in other top-level keys, which are kept
/// in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedDocument {
    #[serde(default)]
    pub metadata: Option<PageMetadata>,
    #[serde(default)]
    pub headings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub links: Vec<Value>,
    #[serde(default)]
    pub images: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ScrapedDocument {
    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.title.as_deref())
    }

    pub fn h1(&self) -> &[String] {
        self.headings.get("h1").map(Vec::as_slice).unwrap_or(&[])
    }
}
