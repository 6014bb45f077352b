//! Field mapping from raw ALM entities to [`Defect`] records.
//!
//! The mapping is a closed, static table ([`AlmField`]): every known ALM
//! field name maps to exactly one record attribute, and anything else in the
//! entity is dropped. Long-text fields keep their original HTML and gain a
//! plain-text derivative produced by [`strip_html`].
//!
//! Normalization is pure: no I/O, input is borrowed, output order matches
//! input order.

use std::collections::HashMap;

use scraper::Html;
use thiserror::Error;

use crate::models::{Defect, DefectPage, RawEntity};

/// Every ALM field the harness understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlmField {
    Id,
    Name,
    Status,
    Priority,
    Severity,
    Owner,
    DetectedBy,
    Description,
    DevComments,
    CreationTime,
    LastModified,
    ClosingDate,
    Reproducible,
    Attachment,
    DetectedInRel,
    DetectedInRcyc,
    ActualFixTime,
    DefectType,
    Application,
    Workstream,
    Module,
    TargetDate,
}

impl AlmField {
    pub const ALL: [AlmField; 22] = [
        AlmField::Id,
        AlmField::Name,
        AlmField::Status,
        AlmField::Priority,
        AlmField::Severity,
        AlmField::Owner,
        AlmField::DetectedBy,
        AlmField::Description,
        AlmField::DevComments,
        AlmField::CreationTime,
        AlmField::LastModified,
        AlmField::ClosingDate,
        AlmField::Reproducible,
        AlmField::Attachment,
        AlmField::DetectedInRel,
        AlmField::DetectedInRcyc,
        AlmField::ActualFixTime,
        AlmField::DefectType,
        AlmField::Application,
        AlmField::Workstream,
        AlmField::Module,
        AlmField::TargetDate,
    ];

    /// Field name as it appears in the ALM `Fields` array.
    pub fn wire_name(self) -> &'static str {
        match self {
            AlmField::Id => "id",
            AlmField::Name => "name",
            AlmField::Status => "status",
            AlmField::Priority => "priority",
            AlmField::Severity => "severity",
            AlmField::Owner => "owner",
            AlmField::DetectedBy => "detected-by",
            AlmField::Description => "description",
            AlmField::DevComments => "dev-comments",
            AlmField::CreationTime => "creation-time",
            AlmField::LastModified => "last-modified",
            AlmField::ClosingDate => "closing-date",
            AlmField::Reproducible => "reproducible",
            AlmField::Attachment => "attachment",
            AlmField::DetectedInRel => "detected-in-rel",
            AlmField::DetectedInRcyc => "detected-in-rcyc",
            AlmField::ActualFixTime => "actual-fix-time",
            // Project-specific custom fields.
            AlmField::DefectType => "user-template-08",
            AlmField::Application => "user-01",
            AlmField::Workstream => "user-template-02",
            AlmField::Module => "user-template-03",
            AlmField::TargetDate => "user-template-12",
        }
    }

    pub fn from_wire(name: &str) -> Option<AlmField> {
        AlmField::ALL.into_iter().find(|f| f.wire_name() == name)
    }
}

/// Name→value lookup for one entity, restricted to known fields.
#[derive(Debug, Default)]
pub struct FieldBag {
    values: HashMap<AlmField, String>,
}

impl FieldBag {
    pub fn from_entity(entity: &RawEntity) -> Self {
        let mut values = HashMap::new();
        for field in &entity.fields {
            let Some(key) = AlmField::from_wire(&field.name) else {
                continue;
            };
            match field.values.first().and_then(|v| v.as_text()) {
                Some(v) => {
                    values.insert(key, v);
                }
                None => {
                    values.remove(&key);
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, field: AlmField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    fn owned(&self, field: AlmField) -> Option<String> {
        self.get(field).map(str::to_string)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("defect {id}: actual-fix-time is not an integer: {value:?}")]
    InvalidFixTime { id: i64, value: String },
}

/// Strip markup from an HTML fragment and collapse whitespace.
///
/// Returns `None` for missing input or when nothing but whitespace remains.
/// The HTML5 parser recovers from any malformed markup, so there is no
/// failure path.
pub fn strip_html(html: Option<&str>) -> Option<String> {
    let html = html.filter(|h| !h.is_empty())?;
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Map a single raw entity to a [`Defect`].
pub fn normalize_entity(entity: &RawEntity) -> Result<Defect, NormalizeError> {
    let bag = FieldBag::from_entity(entity);

    let id = bag
        .get(AlmField::Id)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0);

    let actual_fix_time = match bag.get(AlmField::ActualFixTime) {
        Some(raw) if !raw.is_empty() => Some(raw.trim().parse::<i64>().map_err(|_| {
            NormalizeError::InvalidFixTime {
                id,
                value: raw.to_string(),
            }
        })?),
        _ => None,
    };

    let description_html = bag.owned(AlmField::Description);
    let dev_comments_html = bag.owned(AlmField::DevComments);

    Ok(Defect {
        id,
        name: bag.owned(AlmField::Name).unwrap_or_default(),
        status: bag.owned(AlmField::Status),
        priority: bag.owned(AlmField::Priority),
        severity: bag.owned(AlmField::Severity),
        owner: bag.owned(AlmField::Owner),
        detected_by: bag.owned(AlmField::DetectedBy),
        description: strip_html(description_html.as_deref()),
        description_html,
        dev_comments: strip_html(dev_comments_html.as_deref()),
        dev_comments_html,
        created: bag.owned(AlmField::CreationTime),
        modified: bag.owned(AlmField::LastModified),
        closed: bag.owned(AlmField::ClosingDate),
        reproducible: bag.owned(AlmField::Reproducible),
        attachment: bag.owned(AlmField::Attachment),
        detected_in_rel: bag.owned(AlmField::DetectedInRel),
        detected_in_rcyc: bag.owned(AlmField::DetectedInRcyc),
        actual_fix_time,
        defect_type: bag.owned(AlmField::DefectType),
        application: bag.owned(AlmField::Application),
        workstream: bag.owned(AlmField::Workstream),
        module: bag.owned(AlmField::Module),
        target_date: bag.owned(AlmField::TargetDate),
    })
}

/// Normalize a batch of entities. The first malformed entity aborts the batch.
pub fn normalize(entities: &[RawEntity]) -> Result<Vec<Defect>, NormalizeError> {
    entities.iter().map(normalize_entity).collect()
}

/// Normalize a whole API response (`{entities, TotalResults}`).
pub fn normalize_page(page: &DefectPage) -> Result<Vec<Defect>, NormalizeError> {
    normalize(&page.entities)
}
