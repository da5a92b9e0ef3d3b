use rusqlite::Connection;

use crate::db::migration_runner::MigrationRunner;
use crate::db::seed::seed_default_rules;
use crate::db::snapshot::Snapshot;
use crate::error::{EngineError, Result};

/// Live working copy of the journal: an in-memory SQLite database
/// rebuilt from the decrypted file on unlock.
pub struct Database {
    conn: Connection,
}

impl Database {
    fn open_migrated() -> Result<(Connection, MigrationRunner)> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let runner = MigrationRunner::new();
        let applied = runner.run_pending_migrations(&conn)?;
        log::debug!("Applied {} migrations to working database", applied);

        Ok((conn, runner))
    }

    /// Empty schema plus the default checklist
    pub fn create_new() -> Result<Self> {
        let (conn, _) = Self::open_migrated()?;
        let seeded = seed_default_rules(&conn)?;
        log::info!("Created new journal database ({} default rules)", seeded);
        Ok(Database { conn })
    }

    pub fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Storage(format!("unreadable database contents: {}", e)))?;

        let (conn, runner) = Self::open_migrated()?;
        if snapshot.schema_version > runner.latest_version() {
            return Err(EngineError::validation(format!(
                "database schema version {} is newer than supported version {}",
                snapshot.schema_version,
                runner.latest_version()
            )));
        }
        snapshot.restore(&conn)?;

        log::info!(
            "Loaded journal: {} trades, {} rules",
            snapshot.trades.len(),
            snapshot.rules.len()
        );
        Ok(Database { conn })
    }

    /// Serialize the current contents of `conn`, which may be inside an
    /// uncommitted transaction.
    pub fn snapshot_bytes(conn: &Connection) -> Result<Vec<u8>> {
        let snapshot = Snapshot::capture(conn, MigrationRunner::new().latest_version())?;
        Ok(serde_json::to_vec(&snapshot)?)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
