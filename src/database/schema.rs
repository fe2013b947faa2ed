use rusqlite::{Connection, Result};

/// Initialize the application schema. The offline queue tables are
/// created by the queue crate so both can evolve independently.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_schema_v1(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        log::info!("Database schema created (v1)");
    }

    offline_queue::init_queue_schema(conn)?;

    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<()> {
    // Table: backend_settings (connection to the hosted backend)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS backend_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            base_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            bucket TEXT NOT NULL DEFAULT 'work-photos',
            email TEXT,
            access_token TEXT,
            enabled INTEGER NOT NULL DEFAULT 1 CHECK(enabled IN (0,1)),
            device_id TEXT NOT NULL,
            last_sync TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_backend_settings_timestamp
         AFTER UPDATE ON backend_settings
         BEGIN
            UPDATE backend_settings SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
         END",
        [],
    )?;

    Ok(())
}
