//! Sync driver: periodic discovery of new meetings in the vendor feed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use meeting_store::model::Meeting;
use meeting_store::DynMeetingStore;

use crate::client::{ClientError, ZoomClient};
use crate::selector::{Selection, Selector};
use crate::task::{ShutdownSignal, Task};

const SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// How many feed entries went where during one sync pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub saved: usize,
    pub skip_exists: usize,
    pub skip_duration: usize,
    pub skip_empty: usize,
}

/// Feed-to-store synchronizer shared by the service task and the CLI.
pub struct Syncer {
    store: DynMeetingStore,
    client: Arc<ZoomClient>,
    selector: Selector,
    delete_skipped: bool,
    delete_downloaded: bool,
}

impl Syncer {
    pub fn new(
        store: DynMeetingStore,
        client: Arc<ZoomClient>,
        selector: Selector,
        delete_skipped: bool,
        delete_downloaded: bool,
    ) -> Self {
        Self {
            store,
            client,
            selector,
            delete_skipped,
            delete_downloaded,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Inserts the feed's new meetings, with their records filtered by the
    /// selector. Store failures abort the batch; everything else is local to
    /// a meeting.
    pub async fn sync_meetings(&self, feed: &[Meeting]) -> anyhow::Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();

        if feed.is_empty() {
            debug!("No meetings to sync");
            return Ok(outcome);
        }

        for meeting in feed {
            let records = match self.selector.select(meeting) {
                Selection::SkipDuration => {
                    debug!(uuid = %meeting.uuid, duration = meeting.duration, "Skipping meeting, too short");
                    outcome.skip_duration += 1;
                    self.delete_skipped_meeting(&meeting.uuid).await;
                    continue;
                }
                Selection::SkipEmpty => {
                    debug!(uuid = %meeting.uuid, "Skipping meeting, no records to sync");
                    outcome.skip_empty += 1;
                    self.delete_skipped_meeting(&meeting.uuid).await;
                    continue;
                }
                Selection::Keep(records) => records,
            };

            match self.store.get_meeting(&meeting.uuid).await {
                Ok(_) => {
                    outcome.skip_exists += 1;
                }
                Err(e) if e.is_not_found() => {
                    let mut meeting = meeting.clone();
                    meeting.records = records;

                    self.store
                        .save_meeting(&meeting)
                        .await
                        .with_context(|| format!("failed to save meeting {}", meeting.uuid))?;

                    outcome.saved += 1;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("failed to get meeting {}", meeting.uuid)));
                }
            }
        }

        info!(
            saved = outcome.saved,
            skip_exists = outcome.skip_exists,
            skip_duration = outcome.skip_duration,
            skip_empty = outcome.skip_empty,
            "Sync pass finished"
        );

        Ok(outcome)
    }

    /// Best effort: the skipped meeting is gone from our plans, so the
    /// cloud-side copy may go too when the policy says so.
    async fn delete_skipped_meeting(&self, uuid: &str) {
        if !self.delete_skipped {
            return;
        }

        if let Err(e) = self.client.delete_meeting_recordings(uuid, self.delete_downloaded).await {
            warn!(error = format!("{e:#}"), %uuid, "Failed to delete skipped meeting");
        }
    }
}

pub struct SyncTask {
    client: Arc<ZoomClient>,
    syncer: Syncer,
}

impl SyncTask {
    pub fn new(client: Arc<ZoomClient>, syncer: Syncer) -> Self {
        Self { client, syncer }
    }
}

#[async_trait]
impl Task for SyncTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "sync driver";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        if self.syncer.selector().is_empty() {
            info!("No sync categories configured, sync driver exits");
            return Ok(());
        }

        debug!("Task started");

        loop {
            let feed = match self.client.list_meetings(1).await {
                Ok(feed) => feed,
                Err(ClientError::Cancelled) => break,
                Err(e) => {
                    warn!(error = format!("{e:#}"), "Failed to get meetings, retrying in 30 sec");
                    if !shutdown_signal.sleep(RETRY_DELAY).await {
                        break;
                    }
                    continue;
                }
            };

            debug!(count = feed.len(), "Syncing meetings in feed");

            if let Err(e) = self.syncer.sync_meetings(&feed).await {
                warn!(error = format!("{e:#}"), "Failed to sync meetings, retrying in 30 sec");
                if !shutdown_signal.sleep(RETRY_DELAY).await {
                    break;
                }
                continue;
            }

            if !shutdown_signal.sleep(SYNC_INTERVAL).await {
                break;
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}
