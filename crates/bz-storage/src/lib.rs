pub mod sqlite;

pub use sqlite::{SqliteRecordStore, DATABASE_FILE_NAME};
