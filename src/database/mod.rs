pub mod schema;

use crate::config::SyncConfig;
use crate::error::AppError;
use offline_queue::QueueStore;
use rusqlite::Connection;
use std::path::PathBuf;

#[cfg(target_os = "android")]
use jni::objects::JObject;
#[cfg(target_os = "android")]
use jni::JNIEnv;
#[cfg(target_os = "android")]
use ndk_context::android_context;

const DATABASE_FILE: &str = "fieldsync.db";

/// Returns the directory holding the database and exports
pub fn get_data_directory(config: &SyncConfig) -> PathBuf {
    if let Some(dir) = &config.data_dir {
        return dir.clone();
    }

    #[cfg(target_os = "android")]
    {
        android_files_dir().unwrap_or_else(|e| {
            log::warn!("Falling back to tmp data dir: {}", e);
            PathBuf::from("/data/local/tmp/fieldsync")
        })
    }

    #[cfg(not(target_os = "android"))]
    {
        PathBuf::from("./data")
    }
}

pub fn get_database_path(config: &SyncConfig) -> PathBuf {
    get_data_directory(config).join(DATABASE_FILE)
}

#[cfg(target_os = "android")]
fn android_files_dir() -> Result<PathBuf, AppError> {
    use jni::JavaVM;

    let vm_ptr = android_context().vm() as *mut jni::sys::JavaVM;

    let vm = unsafe { JavaVM::from_raw(vm_ptr) }
        .map_err(|e| AppError::Other(format!("JavaVM creation failed: {}", e)))?;

    let mut env = vm
        .attach_current_thread()
        .map_err(|e| AppError::Other(format!("Failed to attach thread: {}", e)))?;

    let context_ptr = android_context().context();
    let context = unsafe { JObject::from_raw(context_ptr as jni::sys::jobject) };

    files_dir(&mut env, &context)
}

#[cfg(target_os = "android")]
fn files_dir(env: &mut JNIEnv, context: &JObject) -> Result<PathBuf, AppError> {
    let file = env
        .call_method(context, "getFilesDir", "()Ljava/io/File;", &[])
        .and_then(|v| v.l())
        .map_err(|e| AppError::Other(format!("getFilesDir failed: {}", e)))?;

    let path = env
        .call_method(file, "getAbsolutePath", "()Ljava/lang/String;", &[])
        .and_then(|v| v.l())
        .map_err(|e| AppError::Other(format!("getAbsolutePath failed: {}", e)))?;

    let path: String = env
        .get_string(&path.into())
        .map_err(|e| AppError::Other(format!("Failed to read path string: {}", e)))?
        .into();

    Ok(PathBuf::from(path))
}

/// Opens the database file and brings the schema up to date
pub fn init_database(config: &SyncConfig) -> Result<Connection, AppError> {
    let db_path = get_database_path(config);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&db_path)?;
    schema::init_schema(&conn)?;

    log::debug!("Opened database at {}", db_path.display());
    Ok(conn)
}

/// Opens the queue store on its own connection to the same database file.
/// The settings connection and the store connection never share a lock.
pub fn open_queue_store(config: &SyncConfig) -> Result<QueueStore, AppError> {
    let conn = Connection::open(get_database_path(config))?;
    let store = QueueStore::new(conn)?;
    Ok(match config.store_quota_bytes {
        Some(quota) => store.with_quota(quota),
        None => store,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_override() {
        let config = SyncConfig {
            data_dir: Some(PathBuf::from("/tmp/fieldsync-test")),
            ..SyncConfig::default()
        };
        assert_eq!(
            get_database_path(&config),
            PathBuf::from("/tmp/fieldsync-test/fieldsync.db")
        );
    }

    #[test]
    fn test_init_and_open_store() {
        let dir = std::env::temp_dir().join(format!("fieldsync-db-{}", uuid::Uuid::new_v4()));
        let config = SyncConfig {
            data_dir: Some(dir.clone()),
            store_quota_bytes: Some(1024),
            ..SyncConfig::default()
        };

        let conn = init_database(&config).unwrap();
        let tables: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('backend_settings', 'offline_store')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);

        let store = open_queue_store(&config).unwrap();
        assert_eq!(store.quota_bytes(), Some(1024));

        drop(conn);
        drop(store);
        std::fs::remove_dir_all(dir).ok();
    }
}
