pub mod chat;
pub mod error;
pub mod live;
pub mod patch;
pub mod query;
pub mod record;
pub mod traits;

pub use error::*;
pub use live::*;
pub use patch::*;
pub use query::*;
pub use record::*;
pub use traits::*;

/// A stored record: a JSON object whose `id` field holds the serialized
/// [`RecordId`] of the record.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Current time in the fixed-width RFC 3339 form every stored timestamp uses.
/// Fixed width keeps lexical and chronological order identical.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
