//! Filesystem-versus-store audits. Read-only.

use meeting_store::model::RecordStatus;
use meeting_store::{DynMeetingStore, StoreError};

#[derive(Debug, Default)]
pub struct CheckReport {
    /// Downloaded records inspected.
    pub checked: usize,
    /// Human-readable discrepancies, one per bad record.
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Verifies that every `downloaded` record still has its artifact on disk:
/// the file exists, is a regular file, is non-empty and matches the declared
/// size.
pub async fn check_consistency(store: &DynMeetingStore) -> anyhow::Result<CheckReport> {
    let downloaded = store.get_records_by_status(RecordStatus::Downloaded).await?;

    let mut report = CheckReport::default();

    for record in &downloaded {
        let problem = match tokio::fs::metadata(&record.path).await {
            Err(_) => Some(format!("file does not exist: {}", record.path)),
            Ok(meta) if !meta.is_file() => Some(format!("not a regular file: {}", record.path)),
            Ok(meta) if meta.len() == 0 => Some(format!("file is empty: {}", record.path)),
            Ok(meta) if meta.len() != record.file_size.as_bytes() => Some(format!(
                "file size {} does not match the declared {}: {}",
                meta.len(),
                record.file_size.as_bytes(),
                record.path
            )),
            Ok(_) => None,
        };

        if let Some(problem) = problem {
            warn!(id = %record.id, %problem, "Inconsistent record");
            report.problems.push(problem);
        }

        report.checked += 1;
    }

    info!(checked = report.checked, problems = report.problems.len(), "Consistency check finished");

    Ok(report)
}

/// Peer-side answer for the cleanup coordination protocol: `true` only when
/// every given meeting is fully downloaded on this instance, with on-disk
/// sizes matching the declared ones.
pub async fn meetings_loaded(store: &DynMeetingStore, uuids: &[String]) -> anyhow::Result<bool> {
    for uuid in uuids {
        let records = match store.get_records(uuid).await {
            Ok(records) => records,
            Err(StoreError::NotFound) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if records.is_empty() {
            debug!(%uuid, "Unknown meeting, answering pending");
            return Ok(false);
        }

        for record in records {
            if record.status != RecordStatus::Downloaded {
                debug!(%uuid, id = %record.id, status = %record.status, "Record not loaded yet");
                return Ok(false);
            }

            match tokio::fs::metadata(&record.path).await {
                Ok(meta) if meta.len() == record.file_size.as_bytes() => {}
                _ => {
                    debug!(%uuid, id = %record.id, "Artifact missing or size mismatch");
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}
