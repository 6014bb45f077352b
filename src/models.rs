//! Core data models used throughout the defect harness.
//!
//! These types cover both ends of the sync pipeline: the field-bag entities
//! returned by the ALM REST API, and the fixed-shape [`Defect`] records that
//! are persisted to the local store and served by the query layer.

use serde::{Deserialize, Serialize};

/// One page of the ALM `defects` collection as returned on the wire.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefectPage {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    /// Size of the whole remote collection, not of this page.
    #[serde(rename = "TotalResults", default)]
    pub total_results: Option<usize>,
}

/// Raw item produced by the ALM API before normalization.
///
/// ALM represents every entity as an array of named fields, each carrying
/// zero or more values. Only the first value of a field is meaningful.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawEntity {
    #[serde(rename = "Fields", default)]
    pub fields: Vec<RawField>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawField {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(default)]
    pub values: Vec<RawValue>,
}

/// A single field value. ALM sends `{}` for "no value", so `value` is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl RawValue {
    /// Scalar text of this value. Strings pass through, numbers and booleans
    /// are rendered, anything else counts as absent.
    pub fn as_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl RawEntity {
    /// Convenience constructor used by tests and the offline importer.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(name, value)| RawField {
                name: name.to_string(),
                values: value
                    .map(|v| {
                        vec![RawValue {
                            value: Some(serde_json::Value::String(v.to_string())),
                        }]
                    })
                    .unwrap_or_default(),
            })
            .collect();
        Self { fields }
    }
}

/// Normalized defect record stored in SQLite and mirrored to JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub id: i64,
    pub name: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub severity: Option<String>,
    pub owner: Option<String>,
    pub detected_by: Option<String>,
    /// Plain-text rendering of `description_html`.
    pub description: Option<String>,
    pub description_html: Option<String>,
    /// Plain-text rendering of `dev_comments_html`.
    pub dev_comments: Option<String>,
    pub dev_comments_html: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub closed: Option<String>,
    pub reproducible: Option<String>,
    pub attachment: Option<String>,
    pub detected_in_rel: Option<String>,
    pub detected_in_rcyc: Option<String>,
    pub actual_fix_time: Option<i64>,
    pub defect_type: Option<String>,
    pub application: Option<String>,
    pub workstream: Option<String>,
    pub module: Option<String>,
    pub target_date: Option<String>,
}

/// Contents of `sync_meta.json`, rewritten after every successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// RFC 3339 timestamp of the sync.
    pub last_sync: String,
    pub defect_count: usize,
    /// Generation base name relative to the data dir, e.g. `history/defects-20260130-225300`.
    pub current: String,
}
