//! Cleanup coordinator: removes cloud-side copies once every peer instance
//! confirms it holds the recordings locally.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;

use crate::api::{MeetingsLoadedRequest, MeetingsLoadedResponse, PEER_RESULT_OK};
use crate::client::{ClientError, ZoomClient};
use crate::task::ShutdownSignal;

const PEER_RETRY_LIMIT: u32 = 10;
const PEER_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Coordinates cloud-side deletion with the configured peer instances.
///
/// The coordinator never writes to the store: it only reads the vendor feed
/// and drives the vendor client. Peer coordination is advisory; this
/// instance owns the delete decision.
pub struct CleanupJob {
    client: Arc<ZoomClient>,
    http: reqwest::Client,
    instances: Vec<String>,
    access_key_salt: String,
    delete_downloaded: bool,
}

impl CleanupJob {
    pub fn new(client: Arc<ZoomClient>, instances: Vec<String>, access_key_salt: String, delete_downloaded: bool) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            instances,
            access_key_salt,
            delete_downloaded,
        }
    }

    /// Deletes the cloud-side recordings of every meeting recorded
    /// `days_ago`, provided all peers confirm they are loaded.
    pub async fn run(&self, days_ago: i64, shutdown_signal: &mut ShutdownSignal) -> anyhow::Result<()> {
        // A missing peer list is a configuration error, not worth retrying.
        anyhow::ensure!(!self.instances.is_empty(), "no peer instances configured");

        let mut retry = 0u32;

        loop {
            let meetings = match self.client.list_meetings(days_ago).await {
                Ok(meetings) => meetings,
                Err(ClientError::Cancelled) => {
                    info!("Cleanup cancelled");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = format!("{e:#}"), "Failed to get meetings, retrying in 1 minute");
                    if !shutdown_signal.sleep(PEER_RETRY_DELAY).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            info!(count = meetings.len(), "Cleaning up meetings in feed");

            if meetings.is_empty() {
                info!(days_ago, "No meetings to clean up");
                return Ok(());
            }

            let uuids: Vec<String> = meetings.iter().map(|m| m.uuid.clone()).collect();

            match self.request_meetings_loaded(&uuids).await {
                Err(e) => {
                    retry += 1;
                    if retry > PEER_RETRY_LIMIT {
                        warn!("Peer retry limit reached ({PEER_RETRY_LIMIT})");
                        return Err(e.context("peer coordination failed"));
                    }

                    warn!(retry, error = format!("{e:#}"), "Peers unreachable, retrying after 1 minute");

                    if !shutdown_signal.sleep(PEER_RETRY_DELAY).await {
                        return Ok(());
                    }
                    continue;
                }
                Ok(false) => {
                    info!("Deleting skipped - not all meetings are loaded by the peers");
                    return Ok(());
                }
                Ok(true) => {
                    let mut deleted = 0;

                    for meeting in &meetings {
                        match self
                            .client
                            .delete_meeting_recordings(&meeting.uuid, self.delete_downloaded)
                            .await
                        {
                            Ok(()) => deleted += 1,
                            Err(ClientError::Cancelled) => {
                                debug!("Deleting cancelled");
                                return Ok(());
                            }
                            Err(e) => {
                                warn!(error = format!("{e:#}"), uuid = %meeting.uuid, "Failed to delete meeting");
                            }
                        }
                    }

                    info!(deleted, total = meetings.len(), "Deleted cloud-side recordings");
                    return Ok(());
                }
            }
        }
    }

    /// Asks every peer whether it has downloaded all given meetings.
    ///
    /// `Ok(true)` only when every peer answered `ok`; any `pending` answer
    /// vetoes the deletion, any transport problem is an error worth a retry.
    async fn request_meetings_loaded(&self, uuids: &[String]) -> anyhow::Result<bool> {
        anyhow::ensure!(!self.instances.is_empty(), "no peer instances configured");

        let request = MeetingsLoadedRequest {
            meetings: uuids.to_vec(),
        };

        for instance in &self.instances {
            let url = format!(
                "{}/meetingsLoaded/{}",
                instance.trim_end_matches('/'),
                self.access_key_salt
            );

            let response = self
                .http
                .post(&url)
                .json(&request)
                .send()
                .await
                .with_context(|| format!("failed to post meetingsLoaded to {instance}"))?;

            anyhow::ensure!(
                response.status() == StatusCode::OK,
                "peer {instance} answered with status {}",
                response.status(),
            );

            let answer: MeetingsLoadedResponse = response
                .json()
                .await
                .with_context(|| format!("failed to decode the answer of {instance}"))?;

            if answer.result != PEER_RESULT_OK {
                debug!(%instance, result = %answer.result, "Peer vetoed the deletion");
                return Ok(false);
            }
        }

        Ok(true)
    }
}
