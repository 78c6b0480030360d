//! Free-space guard for the artifact repository.

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use meeting_store::model::RecordStatus;
use meeting_store::DynMeetingStore;

#[derive(Debug, Default)]
pub struct ReclaimReport {
    /// Records evicted from disk during this pass.
    pub deleted: usize,
    /// Filesystem problems encountered along the way; none of them aborts
    /// the pass.
    pub errors: Vec<String>,
}

/// Evicts the oldest downloaded artifacts when the repository volume runs
/// low on space.
pub struct Reclaimer {
    store: DynMeetingStore,
    repository: Utf8PathBuf,
    keep_free_space: u64,
}

impl Reclaimer {
    pub fn new(store: DynMeetingStore, repository: Utf8PathBuf, keep_free_space: u64) -> Self {
        Self {
            store,
            repository,
            keep_free_space,
        }
    }

    /// Removes `downloaded` artifacts, oldest first, until the free space on
    /// the repository volume exceeds the configured threshold.
    ///
    /// Only records in status `downloaded` are ever considered; each evicted
    /// record transitions to `deleted` and its empty date folder is removed.
    pub async fn free_up_space(&self) -> anyhow::Result<ReclaimReport> {
        let mut report = ReclaimReport::default();

        let free = free_space(&self.repository)?;
        if free > self.keep_free_space {
            return Ok(report);
        }

        warn!(
            free,
            keep_free_space = self.keep_free_space,
            "Free space is below the configured threshold"
        );

        // Oldest first.
        let downloaded = self.store.get_records_by_status(RecordStatus::Downloaded).await?;

        for record in &downloaded {
            let free = free_space(&self.repository)?;
            if free > self.keep_free_space {
                break;
            }

            if record.path.is_empty() {
                report.errors.push(format!("downloaded record {} has no path", record.id));
                continue;
            }

            // <repository>/<date>/<recordId>/<file> → remove the record folder.
            let Some(record_folder) = Utf8Path::new(&record.path).parent() else {
                report.errors.push(format!("record {} has no parent folder", record.id));
                continue;
            };

            info!(id = %record.id, folder = %record_folder, "Evicting downloaded record");

            if let Err(e) = tokio::fs::remove_dir_all(record_folder).await {
                report.errors.push(format!("failed to remove {record_folder}: {e}"));
                continue;
            }

            self.store.update_record(&record.id, RecordStatus::Deleted, "").await?;
            report.deleted += 1;

            if let Some(date_folder) = record_folder.parent() {
                remove_dir_if_empty(date_folder, &mut report).await;
            }
        }

        Ok(report)
    }
}

async fn remove_dir_if_empty(folder: &Utf8Path, report: &mut ReclaimReport) {
    match tokio::fs::read_dir(folder).await {
        Ok(mut entries) => match entries.next_entry().await {
            Ok(None) => {
                debug!(%folder, "Removing empty date folder");
                if let Err(e) = tokio::fs::remove_dir(folder).await {
                    report.errors.push(format!("failed to remove {folder}: {e}"));
                }
            }
            Ok(Some(_)) => {}
            Err(e) => report.errors.push(format!("failed to read {folder}: {e}")),
        },
        Err(e) => report.errors.push(format!("failed to read {folder}: {e}")),
    }
}

/// Free bytes on the volume holding `path`.
fn free_space(path: &Utf8Path) -> anyhow::Result<u64> {
    let resolved = path
        .canonicalize()
        .with_context(|| format!("failed to resolve {path}"))?;

    let disks = sysinfo::Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(sysinfo::Disk::available_space)
        .with_context(|| format!("no disk found for {path}"))
}
