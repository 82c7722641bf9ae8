mod document;
mod store;

pub use document::{DocId, Document, Hit, ScannedRow, StoredDocument, FILTERED_CONTENT_MAX_BYTES};
pub use store::{
    Store, DB_VERSION, META_CONFIG, META_CURRENT_COLD_INDEX, META_DB_VERSION,
    META_LAST_SYNCED_ROWID, UPSERT_CHUNK_SIZE,
};
