use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// Personality store backed by SQLite.
///
/// One row per user, latest write wins. All access is parameterized so
/// arbitrary personality text (quotes, SQL fragments, emoji) is stored as-is.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS personalities (
                user_id TEXT PRIMARY KEY,
                personality TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Upsert the personality text for a user.
    pub fn set_personality(&self, user_id: &str, personality: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO personalities (user_id, personality) VALUES (?1, ?2)",
            [user_id, personality],
        )?;
        Ok(())
    }

    /// Get the personality text for a user. Absence is a normal result.
    pub fn get_personality(&self, user_id: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT personality FROM personalities WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()
    }

    /// Close the underlying connection. The connection also closes on drop;
    /// this exists so shutdown can flush explicitly and log failures.
    pub fn close(self) {
        let conn = self.conn.into_inner().unwrap();
        if let Err((_conn, e)) = conn.close() {
            log::error!("Failed to close personality database: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_personality() {
        let db = Database::new(":memory:").expect("in-memory db");
        db.set_personality("user-1", "You are a pirate.").unwrap();
        assert_eq!(
            db.get_personality("user-1").unwrap(),
            Some("You are a pirate.".to_string())
        );
    }

    #[test]
    fn get_missing_personality_returns_none() {
        let db = Database::new(":memory:").expect("in-memory db");
        assert_eq!(db.get_personality("nobody").unwrap(), None);
    }

    #[test]
    fn latest_write_wins() {
        let db = Database::new(":memory:").expect("in-memory db");
        db.set_personality("user-1", "first").unwrap();
        db.set_personality("user-1", "second").unwrap();
        assert_eq!(db.get_personality("user-1").unwrap(), Some("second".to_string()));
    }

    #[test]
    fn arbitrary_text_is_stored_verbatim() {
        let db = Database::new(":memory:").expect("in-memory db");
        let hostile = "'; DROP TABLE personalities; -- \"quoted\" 日本語 🤖";
        db.set_personality("user-1", hostile).unwrap();
        assert_eq!(db.get_personality("user-1").unwrap(), Some(hostile.to_string()));
        // Table must still exist and be usable
        db.set_personality("user-2", "still works").unwrap();
        assert_eq!(db.get_personality("user-2").unwrap(), Some("still works".to_string()));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personalities.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(path).expect("file db");
            db.set_personality("user-1", "persistent").unwrap();
            db.close();
        }

        let db = Database::new(path).expect("reopen db");
        assert_eq!(db.get_personality("user-1").unwrap(), Some("persistent".to_string()));
    }
}
