use serde::{Deserialize, Serialize};

use crate::config::IdType;

/// Filtered content is truncated to this many bytes before indexing.
pub const FILTERED_CONTENT_MAX_BYTES: usize = 500;

/// A document identifier: a string or a non-negative integer, depending on
/// the shard's configured id type. Untagged so `"a"` and `42` both parse
/// directly off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocId {
    Int(i64),
    Str(String),
}

impl DocId {
    pub fn matches(&self, id_type: IdType) -> bool {
        match (self, id_type) {
            (DocId::Int(_), IdType::Integer) => true,
            (DocId::Str(_), IdType::String) => true,
            _ => false,
        }
    }

    /// The rowid this id maps to in integer mode.
    pub fn as_rowid(&self) -> Option<i64> {
        match self {
            DocId::Int(value) => Some(*value),
            DocId::Str(_) => None,
        }
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocId::Int(value) => write!(f, "{}", value),
            DocId::Str(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        DocId::Str(value.to_string())
    }
}

impl From<i64> for DocId {
    fn from(value: i64) -> Self {
        DocId::Int(value)
    }
}

/// A document as it arrives from the ingestion path. Unknown wire fields are
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<DocId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// The indexable form of a document: id plus filtered content, truncated to
/// [`FILTERED_CONTENT_MAX_BYTES`] on a char boundary. The store assigns the
/// rowid on insert (integer mode reuses the id itself).
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: DocId,
    pub filtered_content: String,
}

impl StoredDocument {
    pub fn new(id: DocId, filtered: String) -> Self {
        Self {
            id,
            filtered_content: truncate_on_char_boundary(filtered, FILTERED_CONTENT_MAX_BYTES),
        }
    }
}

fn truncate_on_char_boundary(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

/// A search hit. `rank` is the FTS rank (lower sorts better).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub id: DocId,
    pub content: String,
    pub rank: f64,
}

/// A row streamed out of the store in rowid order, for replication and
/// lifecycle migration.
#[derive(Debug, Clone)]
pub struct ScannedRow {
    pub rowid: i64,
    pub id: DocId,
    pub content: String,
}

impl ScannedRow {
    pub fn into_document(self) -> Document {
        Document {
            id: self.id,
            content: self.content,
        }
    }
}
