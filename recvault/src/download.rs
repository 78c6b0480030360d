//! Download driver: drains the record queue one fetch at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use meeting_store::model::{Record, RecordStatus};
use meeting_store::{DynMeetingStore, StoreError};

use crate::client::{ClientError, ZoomClient};
use crate::config::Conf;
use crate::fetch;
use crate::reclaim::Reclaimer;
use crate::task::{ShutdownSignal, Task};

/// Cadence while the queue has work (and after an error).
const BUSY_TICK: Duration = Duration::from_secs(1);
/// Cadence while the queue is empty.
const IDLE_TICK: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no queued records")]
    NoQueuedRecords,

    #[error("integrity check failed for record {id}: {reason}")]
    Integrity { id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One-record-at-a-time downloader shared by the service task and the CLI.
pub struct Downloader {
    store: DynMeetingStore,
    client: Arc<ZoomClient>,
    conf: Arc<Conf>,
    reclaimer: Reclaimer,
    http: reqwest::Client,
}

impl Downloader {
    pub fn new(store: DynMeetingStore, client: Arc<ZoomClient>, conf: Arc<Conf>) -> Self {
        let reclaimer = Reclaimer::new(
            Arc::clone(&store),
            conf.storage.repository.clone(),
            conf.storage.keep_free_space,
        );

        Self {
            store,
            client,
            conf,
            reclaimer,
            http: reqwest::Client::new(),
        }
    }

    /// Picks the next queued record and downloads it.
    ///
    /// An empty queue triggers the crash-recovery path: `failed` and
    /// `downloading` records are put back to `queued` for the next pass.
    pub async fn download_once(&self) -> Result<(), DownloadError> {
        let queued = match self.store.get_queued_record().await {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                debug!("No queued records");
                self.store.reset_failed_records().await?;
                return Err(DownloadError::NoQueuedRecords);
            }
            Err(e) => return Err(e.into()),
        };

        info!(size = %queued.file_size, kind = %queued.kind, id = %queued.id, "↓ downloading record");

        self.download_record(&queued).await?;

        // Once the whole meeting is on disk, the cloud-side copy can go.
        if (self.conf.client.delete_downloaded || self.conf.client.trash_downloaded)
            && self.meeting_records_loaded(&queued.meeting_id).await
        {
            if let Err(e) = self
                .client
                .delete_meeting_recordings(&queued.meeting_id, self.conf.client.delete_downloaded)
                .await
            {
                warn!(
                    error = format!("{e:#}"),
                    uuid = %queued.meeting_id,
                    "Failed to delete cloud-side recordings"
                );
            }
        }

        Ok(())
    }

    async fn download_record(&self, record: &Record) -> Result<(), DownloadError> {
        let token = self.client.get_token().await?;

        self.store
            .update_record(&record.id, RecordStatus::Downloading, "")
            .await?;

        let dest_dir = self
            .conf
            .storage
            .repository
            .join(record.date_folder())
            .join(&record.id);

        tokio::fs::create_dir_all(&dest_dir)
            .await
            .with_context(|| format!("failed to create {dest_dir}"))?;

        // Best effort: a reclaimer failure must not block the download.
        match self.reclaimer.free_up_space().await {
            Ok(report) => {
                if report.deleted > 0 {
                    info!(deleted = report.deleted, "Reclaimed disk space");
                }
                for problem in &report.errors {
                    warn!(%problem, "Reclaimer hiccup");
                }
            }
            Err(e) => warn!(error = format!("{e:#}"), "Reclaimer failed"),
        }

        let url = format!("{}?access_token={}", record.download_url, token.access_token);
        let fallback_name = format!("{}.{}", record.id, record.file_extension.to_lowercase());

        let fetched = match fetch::fetch_to_dir(&self.http, &url, &dest_dir, &fallback_name).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.store.update_record(&record.id, RecordStatus::Failed, "").await?;
                return Err(DownloadError::Other(
                    anyhow::Error::new(e).context(format!("failed to download record {}", record.id)),
                ));
            }
        };

        if fetched.size == 0 || fetched.size != record.file_size.as_bytes() {
            self.store.update_record(&record.id, RecordStatus::Failed, "").await?;
            return Err(DownloadError::Integrity {
                id: record.id.clone(),
                reason: format!(
                    "size {} does not match the declared {}",
                    fetched.size,
                    record.file_size.as_bytes()
                ),
            });
        }

        let extension = record.file_extension.to_lowercase();
        if !fetched.file_name.to_lowercase().ends_with(&extension) {
            self.store.update_record(&record.id, RecordStatus::Failed, "").await?;
            return Err(DownloadError::Integrity {
                id: record.id.clone(),
                reason: format!(
                    "file name {} does not carry the declared extension {}",
                    fetched.file_name, record.file_extension
                ),
            });
        }

        debug!(path = %fetched.path, "Download saved");

        self.store
            .update_record(&record.id, RecordStatus::Downloaded, fetched.path.as_str())
            .await?;

        Ok(())
    }

    async fn meeting_records_loaded(&self, meeting_id: &str) -> bool {
        match self.store.get_records(meeting_id).await {
            Ok(records) => {
                !records.is_empty() && records.iter().all(|r| r.status == RecordStatus::Downloaded)
            }
            Err(e) => {
                warn!(error = format!("{e:#}"), "Failed to look up meeting records");
                false
            }
        }
    }

    /// Downloads until the queue is empty. Records that fail stay `failed`
    /// and are retried on a later pass; one bad record does not stop the
    /// drain.
    pub async fn drain_queue(&self) -> anyhow::Result<()> {
        loop {
            match self.download_once().await {
                Ok(()) => {}
                Err(DownloadError::NoQueuedRecords) => return Ok(()),
                Err(e) => warn!(error = format!("{e:#}"), "Download failed"),
            }
        }
    }
}

pub struct DownloadTask {
    downloader: Downloader,
}

impl DownloadTask {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }
}

#[async_trait]
impl Task for DownloadTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "download driver";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        let mut ticker = retune(BUSY_TICK);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown_signal.wait() => break,
            }

            match self.downloader.download_once().await {
                Ok(()) => ticker = retune(BUSY_TICK),
                Err(DownloadError::NoQueuedRecords) => ticker = retune(IDLE_TICK),
                Err(e) => {
                    warn!(error = format!("{e:#}"), "Download failed");
                    ticker = retune(BUSY_TICK);
                }
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}

/// Fresh ticker whose first tick fires after a full period, not immediately.
fn retune(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker
}
