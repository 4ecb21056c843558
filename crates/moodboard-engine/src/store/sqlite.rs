use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use moodboard_contracts::{ConversationId, ImageRef};
use rusqlite::{params, Connection, OptionalExtension};

use super::{ReferenceStore, SessionModeTracker, StoreError};

const BACKEND: &str = "sqlite";

pub type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::unavailable(BACKEND, "connection lock poisoned"))
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::unavailable(BACKEND, err)
}

/// References as rows of `style_references`, ordered by insertion time.
/// Images are stored as the JSON form of [`ImageRef`].
#[derive(Debug, Clone)]
pub struct SqliteReferenceStore {
    conn: SharedConnection,
}

impl SqliteReferenceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::unavailable(BACKEND, err))?;
            }
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::with_connection(conn)
    }

    pub fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shares the connection with a [`SqliteSessionModes`].
    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.conn)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS style_references (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL,
            image_ref       TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_style_references_conversation
            ON style_references(conversation_id, id);
        CREATE TABLE IF NOT EXISTS session_modes (
            conversation_id TEXT PRIMARY KEY,
            collecting      INTEGER NOT NULL DEFAULT 0
        );",
    )
}

impl ReferenceStore for SqliteReferenceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn list(&self, conversation: &ConversationId) -> Result<Vec<ImageRef>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT image_ref FROM style_references
                 WHERE conversation_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![conversation.as_str()], |row| row.get::<_, String>(0))
            .map_err(unavailable)?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(unavailable)?;
            let image: ImageRef =
                serde_json::from_str(&raw).map_err(|err| StoreError::corrupt(BACKEND, err))?;
            out.push(image);
        }
        Ok(out)
    }

    fn append(&self, conversation: &ConversationId, image: ImageRef) -> Result<(), StoreError> {
        let encoded =
            serde_json::to_string(&image).map_err(|err| StoreError::corrupt(BACKEND, err))?;
        let created_at = chrono::Utc::now().timestamp_millis();
        lock(&self.conn)?
            .execute(
                "INSERT INTO style_references (conversation_id, image_ref, created_at)
                 VALUES (?1, ?2, ?3)",
                params![conversation.as_str(), encoded, created_at],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        lock(&self.conn)?
            .execute(
                "DELETE FROM style_references WHERE conversation_id = ?1",
                params![conversation.as_str()],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn count(&self, conversation: &ConversationId) -> Result<usize, StoreError> {
        let count: i64 = lock(&self.conn)?
            .query_row(
                "SELECT COUNT(*) FROM style_references WHERE conversation_id = ?1",
                params![conversation.as_str()],
                |row| row.get(0),
            )
            .map_err(unavailable)?;
        Ok(count.max(0) as usize)
    }
}

/// One row per conversation in `session_modes`.
#[derive(Debug, Clone)]
pub struct SqliteSessionModes {
    conn: SharedConnection,
}

impl SqliteSessionModes {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl SessionModeTracker for SqliteSessionModes {
    fn get(&self, conversation: &ConversationId) -> Result<bool, StoreError> {
        let collecting: Option<i64> = lock(&self.conn)?
            .query_row(
                "SELECT collecting FROM session_modes WHERE conversation_id = ?1",
                params![conversation.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;
        Ok(collecting.unwrap_or(0) != 0)
    }

    fn set(&self, conversation: &ConversationId, collecting: bool) -> Result<(), StoreError> {
        lock(&self.conn)?
            .execute(
                "INSERT INTO session_modes (conversation_id, collecting) VALUES (?1, ?2)
                 ON CONFLICT(conversation_id) DO UPDATE SET collecting = excluded.collecting",
                params![conversation.as_str(), collecting as i64],
            )
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use moodboard_contracts::{ConversationId, ImageRef};
    use rusqlite::Connection;

    use super::{SqliteReferenceStore, SqliteSessionModes};
    use crate::store::contract::{check_reference_store, check_session_modes};
    use crate::store::{ReferenceStore, SessionModeTracker, StoreError};

    #[test]
    fn sqlite_store_honours_contract() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SqliteReferenceStore::open(&temp.path().join("db").join("moodboard.db"))?;
        check_reference_store(&store, |a, b| a == b)?;
        check_session_modes(&SqliteSessionModes::new(store.connection()))
    }

    #[test]
    fn sqlite_state_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("moodboard.db");
        let chat = ConversationId::from(99_i64);
        {
            let store = SqliteReferenceStore::open(&path)?;
            store.append(&chat, ImageRef::remote("first"))?;
            store.append(&chat, ImageRef::remote("second"))?;
            SqliteSessionModes::new(store.connection()).set(&chat, true)?;
        }

        let reopened = SqliteReferenceStore::open(&path)?;
        assert_eq!(
            reopened.list(&chat)?,
            vec![ImageRef::remote("first"), ImageRef::remote("second")]
        );
        assert!(SqliteSessionModes::new(reopened.connection()).get(&chat)?);
        Ok(())
    }

    #[test]
    fn undecodable_row_is_reported_as_corrupt() -> anyhow::Result<()> {
        let store = SqliteReferenceStore::with_connection(Connection::open_in_memory()?)?;
        store
            .connection()
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .execute(
                "INSERT INTO style_references (conversation_id, image_ref, created_at)
                 VALUES ('1', 'not json', 0)",
                [],
            )?;
        let err = store.list(&ConversationId::from(1_i64));
        assert!(matches!(err, Err(StoreError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn list_follows_arrival_even_when_clock_steps_back() -> anyhow::Result<()> {
        let store = SqliteReferenceStore::with_connection(Connection::open_in_memory()?)?;
        let chat = ConversationId::from(3_i64);
        let future = ImageRef::remote("stamped-in-the-future");
        store
            .connection()
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?
            .execute(
                "INSERT INTO style_references (conversation_id, image_ref, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    chat.as_str(),
                    serde_json::to_string(&future)?,
                    i64::MAX
                ],
            )?;
        store.append(&chat, ImageRef::remote("appended-now"))?;

        assert_eq!(
            store.list(&chat)?,
            vec![future, ImageRef::remote("appended-now")]
        );
        Ok(())
    }
}
