//! Dense class-id to display-name lookup.

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};

/// Name used for class ids the label map has no entry for.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Largest class id a label map may declare. Ids above it are rejected
/// rather than allocating a table sized by untrusted input.
pub const MAX_CLASS_ID: i64 = 1 << 20;

/// One entry of a label-map document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl LabelEntry {
    fn label(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.name.as_deref())
    }
}

/// Label map lookup table. Index `i` holds the display name for class `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Uses `names` as-is: class `i` maps to `names[i]`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Display name for `id`, or [`UNKNOWN_LABEL`] when out of range.
    pub fn get(&self, id: usize) -> &str {
        self.labels
            .get(id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// Builds a dense label map from sparse entries.
///
/// The result has `max(id) + 1` slots, all starting as [`UNKNOWN_LABEL`].
/// Each entry writes its `display_name`, falling back to `name`. Entries
/// sharing an id are applied in input order, so the last one wins.
pub fn build_label_map(entries: &[LabelEntry]) -> Result<LabelMap> {
    if let Some(bad) = entries.iter().find(|e| e.id < 0) {
        return Err(VisionError::InvalidLabelMap(format!(
            "negative class id {}",
            bad.id
        )));
    }
    let Some(max_id) = entries.iter().map(|e| e.id).max() else {
        return Ok(LabelMap::empty());
    };
    if max_id > MAX_CLASS_ID {
        return Err(VisionError::InvalidLabelMap(format!(
            "class id {max_id} exceeds limit {MAX_CLASS_ID}"
        )));
    }
    let len = max_id as usize + 1;

    let mut labels = vec![UNKNOWN_LABEL.to_string(); len];
    for entry in entries {
        if let Some(label) = entry.label() {
            labels[entry.id as usize] = label.to_string();
        }
    }
    Ok(LabelMap { labels })
}

#[derive(Debug, Deserialize)]
struct LabelMapDocument {
    #[serde(default)]
    item: Vec<RawLabelEntry>,
}

#[derive(Debug, Deserialize)]
struct RawLabelEntry {
    id: serde_json::Number,
    name: Option<String>,
    display_name: Option<String>,
}

impl TryFrom<RawLabelEntry> for LabelEntry {
    type Error = VisionError;

    fn try_from(raw: RawLabelEntry) -> Result<Self> {
        let id = raw
            .id
            .as_i64()
            .ok_or_else(|| VisionError::InvalidLabelMap(format!("non-integer class id {}", raw.id)))?;
        Ok(LabelEntry {
            id,
            name: raw.name,
            display_name: raw.display_name,
        })
    }
}

/// Decodes a `{ "item": [...] }` label-map document and builds the map.
pub fn parse_label_map(bytes: &[u8]) -> Result<LabelMap> {
    let doc: LabelMapDocument = serde_json::from_slice(bytes)
        .map_err(|e| VisionError::InvalidLabelMap(e.to_string()))?;
    let entries = doc
        .item
        .into_iter()
        .map(LabelEntry::try_from)
        .collect::<Result<Vec<_>>>()?;
    build_label_map(&entries)
}
