use crate::error::AppError;
use crate::models::BackendSettings;
use rusqlite::{params, Connection};

/// Loads the backend settings from the database
pub fn load_backend_settings(conn: &Connection) -> Result<Option<BackendSettings>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, base_url, api_key, bucket, email, access_token, enabled, device_id, last_sync, created_at, updated_at
         FROM backend_settings
         ORDER BY id DESC
         LIMIT 1",
    )?;

    let result = stmt.query_row([], |row| {
        Ok(BackendSettings {
            id: row.get(0)?,
            base_url: row.get(1)?,
            api_key: row.get(2)?,
            bucket: row.get(3)?,
            email: row.get(4)?,
            access_token: row.get(5)?,
            enabled: row.get(6)?,
            device_id: row.get(7)?,
            last_sync: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    });

    match result {
        Ok(settings) => Ok(Some(settings)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Saves or updates the backend settings. An existing device id is kept.
pub fn save_backend_settings(conn: &Connection, settings: &BackendSettings) -> Result<i64, AppError> {
    if settings.base_url.trim().is_empty() {
        return Err(AppError::Validation("Backend URL must not be empty".to_string()));
    }

    match load_backend_settings(conn)? {
        Some(existing) => {
            conn.execute(
                "UPDATE backend_settings
                 SET base_url = ?1, api_key = ?2, bucket = ?3, email = ?4, access_token = ?5, enabled = ?6
                 WHERE id = ?7",
                params![
                    &settings.base_url,
                    &settings.api_key,
                    &settings.bucket,
                    &settings.email,
                    &settings.access_token,
                    settings.enabled,
                    existing.id,
                ],
            )?;
            Ok(existing.id)
        }
        None => {
            conn.execute(
                "INSERT INTO backend_settings (base_url, api_key, bucket, email, access_token, enabled, device_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &settings.base_url,
                    &settings.api_key,
                    &settings.bucket,
                    &settings.email,
                    &settings.access_token,
                    settings.enabled,
                    &settings.device_id,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Stores the session of a successful sign-in
pub fn store_session(conn: &Connection, email: &str, access_token: &str) -> Result<(), AppError> {
    let updated = conn.execute(
        "UPDATE backend_settings SET email = ?1, access_token = ?2
         WHERE id = (SELECT MAX(id) FROM backend_settings)",
        params![email, access_token],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound("Backend settings".to_string()));
    }
    Ok(())
}

/// Updates the timestamp of the last completed sync pass
pub fn update_last_sync(conn: &Connection) -> Result<(), AppError> {
    conn.execute(
        "UPDATE backend_settings SET last_sync = CURRENT_TIMESTAMP WHERE id = (SELECT MAX(id) FROM backend_settings)",
        [],
    )?;
    Ok(())
}

pub fn set_sync_enabled(conn: &Connection, enabled: bool) -> Result<(), AppError> {
    conn.execute(
        "UPDATE backend_settings SET enabled = ?1 WHERE id = (SELECT MAX(id) FROM backend_settings)",
        [enabled],
    )?;
    Ok(())
}

pub fn delete_backend_settings(conn: &Connection) -> Result<(), AppError> {
    conn.execute("DELETE FROM backend_settings", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::init_schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn settings() -> BackendSettings {
        BackendSettings::new(
            "https://api.example.com".to_string(),
            "anon-key".to_string(),
            "work-photos".to_string(),
        )
    }

    #[test]
    fn test_load_empty() {
        let conn = setup();
        assert!(load_backend_settings(&conn).unwrap().is_none());
    }

    #[test]
    fn test_save_and_update_keeps_device_id() {
        let conn = setup();
        let first = settings();
        let id = save_backend_settings(&conn, &first).unwrap();

        let mut second = settings();
        second.base_url = "https://other.example.com".to_string();
        assert_eq!(save_backend_settings(&conn, &second).unwrap(), id);

        let loaded = load_backend_settings(&conn).unwrap().unwrap();
        assert_eq!(loaded.base_url, "https://other.example.com");
        assert_eq!(loaded.device_id, first.device_id);
        assert!(loaded.enabled);
    }

    #[test]
    fn test_store_session_requires_settings() {
        let conn = setup();
        assert!(matches!(
            store_session(&conn, "tech@example.com", "token"),
            Err(AppError::NotFound(_))
        ));

        save_backend_settings(&conn, &settings()).unwrap();
        store_session(&conn, "tech@example.com", "token").unwrap();

        let loaded = load_backend_settings(&conn).unwrap().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("token"));
        assert_eq!(
            loaded.to_backend_config().access_token.as_deref(),
            Some("token")
        );
    }

    #[test]
    fn test_enable_and_last_sync() {
        let conn = setup();
        save_backend_settings(&conn, &settings()).unwrap();
        set_sync_enabled(&conn, false).unwrap();
        update_last_sync(&conn).unwrap();

        let loaded = load_backend_settings(&conn).unwrap().unwrap();
        assert!(!loaded.enabled);
        assert!(loaded.last_sync.is_some());

        delete_backend_settings(&conn).unwrap();
        assert!(load_backend_settings(&conn).unwrap().is_none());
    }

    #[test]
    fn test_empty_url_rejected() {
        let conn = setup();
        let mut s = settings();
        s.base_url = "  ".to_string();
        assert!(matches!(
            save_backend_settings(&conn, &s),
            Err(AppError::Validation(_))
        ));
    }
}
