pub mod db;
pub mod error;
pub mod tags_file;

pub use db::{all_entries, create_db, insert_entries, update_tags, DbPool, StoredEntry};
pub use error::StorageError;
