//! Store bootstrap from the configuration.

use std::sync::Arc;

use anyhow::Context as _;
use meeting_store::{DynMeetingStore, MeetingStore as _};
use meeting_store_libsql::{libsql, LibSqlMeetingStore};

use crate::config::{dto::StorageKind, StorageConf};

/// Opens the configured backend and runs migrations.
pub async fn load_store(conf: &StorageConf) -> anyhow::Result<DynMeetingStore> {
    match conf.kind {
        StorageKind::Sqlite => {
            if let Some(parent) = conf.path.parent() {
                if !parent.as_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {parent}"))?;
                }
            }

            let database = libsql::Builder::new_local(conf.path.as_str())
                .build()
                .await
                .context("build database")?;

            let conn = database.connect().context("open database connection")?;

            let store = LibSqlMeetingStore::new(conn);

            store.setup().await.context("database migration")?;

            Ok(Arc::new(store))
        }
    }
}

/// Puts every record stranded in `downloading` or `failed` back into the
/// queue: nothing may stay mid-flight across a restart.
pub async fn recover_in_flight(store: &DynMeetingStore) -> anyhow::Result<()> {
    let requeued = store
        .reset_failed_records()
        .await
        .context("failed to reset in-flight records")?;

    if requeued > 0 {
        info!(requeued, "Put stranded records back into the queue");
    }

    Ok(())
}
