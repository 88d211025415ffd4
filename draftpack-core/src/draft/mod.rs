pub mod document;
pub mod error;
pub mod store;

pub use document::{is_valid_draft_id, DraftDocument, Material, MediaKind, Segment, Track};
pub use error::{DraftError, DraftResult};
pub use store::{DraftRecord, DraftStore, SqliteDraftStore, SqliteDraftStoreBuilder};
