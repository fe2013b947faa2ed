// Export/import of the offline queues as a zip archive

use crate::error::AppError;
use chrono::Utc;
use offline_queue::{
    OfflineQueue, PendingCheckIn, PendingCounts, PendingItem, PendingPhoto, PendingReport,
    QueueKind,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ExportMetadata {
    format_version: u32,
    exported_at: String,
    app_version: String,
    counts: PendingCounts,
}

fn entry_name(kind: QueueKind) -> String {
    format!("data/{}.json", kind.as_str())
}

fn write_entry<W, T>(
    zip: &mut zip::ZipWriter<W>,
    name: &str,
    value: &T,
    options: zip::write::FileOptions<'_, ()>,
) -> Result<(), AppError>
where
    W: Write + Seek,
    T: Serialize + ?Sized,
{
    let json = serde_json::to_vec_pretty(value)?;
    zip.start_file(name, options)?;
    zip.write_all(&json)?;
    Ok(())
}

/// Writes all queued items into `<dir>/fieldsync-export-<timestamp>.zip`
pub fn export_to_zip(queue: &OfflineQueue, dir: &Path) -> Result<PathBuf, AppError> {
    let photos = queue.photos();
    let check_ins = queue.check_ins();
    let reports = queue.reports();
    write_archive(dir, &photos, &check_ins, &reports)
}

fn write_archive(
    dir: &Path,
    photos: &[PendingPhoto],
    check_ins: &[PendingCheckIn],
    reports: &[PendingReport],
) -> Result<PathBuf, AppError> {
    fs::create_dir_all(dir)?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let export_path = dir.join(format!("fieldsync-export-{}.zip", timestamp));

    let file = fs::File::create(&export_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions<'_, ()> =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let metadata = ExportMetadata {
        format_version: FORMAT_VERSION,
        exported_at: Utc::now().to_rfc3339(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        counts: PendingCounts::new(photos.len(), check_ins.len(), reports.len()),
    };
    write_entry(&mut zip, "metadata.json", &metadata, options)?;
    write_entry(&mut zip, &entry_name(QueueKind::Photos), photos, options)?;
    write_entry(&mut zip, &entry_name(QueueKind::CheckIns), check_ins, options)?;
    write_entry(&mut zip, &entry_name(QueueKind::Reports), reports, options)?;

    zip.finish()?;

    log::info!(
        "Exported {} pending items to {}",
        metadata.counts.total,
        export_path.display()
    );
    Ok(export_path)
}

/// Exports the queues, then removes exactly the exported items.
/// Items queued after the snapshot stay in place.
pub fn export_and_clear(queue: &OfflineQueue, dir: &Path) -> Result<PathBuf, AppError> {
    let photos = queue.photos();
    let check_ins = queue.check_ins();
    let reports = queue.reports();
    let path = write_archive(dir, &photos, &check_ins, &reports)?;

    remove_all(queue, &photos)?;
    remove_all(queue, &check_ins)?;
    remove_all(queue, &reports)?;
    Ok(path)
}

fn remove_all<T: PendingItem>(queue: &OfflineQueue, items: &[T]) -> Result<(), AppError> {
    for item in items {
        queue.remove::<T>(item.id())?;
    }
    Ok(())
}

fn read_entry<R, T>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<Vec<T>, AppError>
where
    R: Read + Seek,
    T: PendingItem,
{
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&buf)
        .map_err(|e| AppError::Validation(format!("{} is not a valid item list: {}", name, e)))?;

    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("Skipping invalid entry in {}: {}", name, e);
                None
            }
        })
        .collect())
}

/// Restores queued items from an export. Ids that are already queued are
/// skipped. Returns the number of items added per kind.
pub fn import_from_zip(queue: &OfflineQueue, import_path: &Path) -> Result<PendingCounts, AppError> {
    let file = fs::File::open(import_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let metadata: Option<ExportMetadata> = match archive.by_name("metadata.json") {
        Ok(mut f) => {
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            Some(serde_json::from_str(&buf)?)
        }
        Err(_) => None,
    };
    match metadata {
        Some(m) if m.format_version > FORMAT_VERSION => {
            return Err(AppError::Validation(format!(
                "Export format {} is newer than supported ({})",
                m.format_version, FORMAT_VERSION
            )));
        }
        Some(_) => {}
        None => return Err(AppError::Validation("Not a fieldsync export".to_string())),
    }

    let photos: Vec<PendingPhoto> = read_entry(&mut archive, &entry_name(QueueKind::Photos))?;
    let check_ins: Vec<PendingCheckIn> =
        read_entry(&mut archive, &entry_name(QueueKind::CheckIns))?;
    let reports: Vec<PendingReport> = read_entry(&mut archive, &entry_name(QueueKind::Reports))?;

    let added = PendingCounts::new(
        queue.restore(photos)?,
        queue.restore(check_ins)?,
        queue.restore(reports)?,
    );

    log::info!(
        "Imported {} items from {}",
        added.total,
        import_path.display()
    );
    Ok(added)
}
