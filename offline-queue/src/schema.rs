use rusqlite::{Connection, Result};

/// Initialize the offline queue schema
pub fn init_queue_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS queue_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM queue_schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_queue_schema_v1(conn)?;
        conn.execute("INSERT INTO queue_schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

/// Version 1: a plain key-value table, one JSON array per queue kind
fn create_queue_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS offline_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_queue_schema(&conn).unwrap();
        init_queue_schema(&conn).unwrap();

        let versions: i32 = conn
            .query_row("SELECT COUNT(*) FROM queue_schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(versions, 1);
    }
}
