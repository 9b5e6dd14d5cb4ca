mod sqlite;

pub use sqlite::Database;
