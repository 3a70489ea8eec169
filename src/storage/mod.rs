pub mod catalog;
pub mod sqlite;

pub use catalog::{TableDescription, TableMetadataProvider};
pub use sqlite::{open_connection, DiffObjectReader, SqliteObjectStore};
