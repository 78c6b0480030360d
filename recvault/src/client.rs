//! Rate-limited REST client for the vendor's recordings API.

use chrono::{DateTime, Local, NaiveDate, Utc};
use meeting_store::model::{CloudRecordingReport, FileSize, Meeting, DATE_FORMAT};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use typed_builder::TypedBuilder;

use crate::config::{dto::ClientConf, RateTier};
use crate::task::ShutdownSignal;

/// Issued tokens are considered stale this long before the vendor-reported
/// expiry, so an in-flight request never rides a token about to die.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 5 * 60;

const LISTING_PAGE_SIZE: &str = "300";
const LISTING_WINDOW_DAYS: i64 = 30;
const LISTING_RETRY_LIMIT: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unable to authorize with account id {account_id} and client id {client_id}, status {status}")]
    Auth {
        account_id: String,
        client_id: String,
        status: StatusCode,
    },

    #[error("unexpected status {status} while {doing}")]
    UnexpectedStatus { status: StatusCode, doing: &'static str },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Config(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn is_valid(&self) -> bool {
        self.expires_at.is_some_and(|at| at > Utc::now())
    }
}

#[derive(Deserialize)]
struct RecordingsPage {
    #[serde(default)]
    next_page_token: String,
    #[serde(default)]
    meetings: Vec<Meeting>,
}

/// Client against the vendor REST API.
///
/// The bearer token is shared mutable state: the whole check-then-refresh
/// path holds a mutex, so concurrent callers trigger at most one
/// authorization round trip.
#[derive(TypedBuilder)]
pub struct ZoomClient {
    conf: ClientConf,
    shutdown_signal: ShutdownSignal,
    #[builder(default = String::from("https://zoom.us"))]
    oauth_base: String,
    #[builder(default = String::from("https://api.zoom.us"))]
    api_base: String,
    #[builder(default, setter(skip))]
    http: reqwest::Client,
    #[builder(default, setter(skip))]
    token: Mutex<Option<AccessToken>>,
}

impl ZoomClient {
    async fn authorize(&self) -> Result<AccessToken, ClientError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.oauth_base))
            .basic_auth(&self.conf.id, Some(&self.conf.secret))
            .form(&[
                ("grant_type", "account_credentials"),
                ("account_id", self.conf.account_id.as_str()),
            ])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ClientError::Auth {
                account_id: self.conf.account_id.clone(),
                client_id: self.conf.id.clone(),
                status: response.status(),
            });
        }

        let mut token: AccessToken = response.json().await?;

        let lifetime = i64::try_from(token.expires_in).unwrap_or(i64::MAX);
        token.expires_at =
            Some(Utc::now() + chrono::Duration::seconds(lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)));

        debug!(expires_at = ?token.expires_at, "Authorized");

        Ok(token)
    }

    /// Returns the cached bearer token, refreshing it lazily.
    pub async fn get_token(&self) -> Result<AccessToken, ClientError> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_valid() {
                return Ok(token.clone());
            }
        }

        let token = self.authorize().await?;
        *guard = Some(token.clone());

        Ok(token)
    }

    async fn throttle(&self, tier: RateTier) -> Result<(), ClientError> {
        let delay = self.conf.rate_limiting_delay.delay(tier);
        let mut signal = self.shutdown_signal.clone();

        if signal.sleep(delay).await {
            Ok(())
        } else {
            Err(ClientError::Cancelled)
        }
    }

    /// Meetings recorded on a single day (`days_ago` = 0 for today, 1 for
    /// yesterday, …).
    pub async fn list_meetings(&self, days_ago: i64) -> Result<Vec<Meeting>, ClientError> {
        let day = Local::now().date_naive() - chrono::Duration::days(days_ago);
        self.list_interval_meetings(day, day).await
    }

    /// Meetings recorded in the inclusive `from..=to` interval.
    ///
    /// Paginates through the feed; Medium tier between pages, cancellable
    /// between pages.
    pub async fn list_interval_meetings(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Meeting>, ClientError> {
        let token = self.get_token().await?;

        let from = from.format(DATE_FORMAT).to_string();
        let to = to.format(DATE_FORMAT).to_string();

        let mut meetings = Vec::new();
        let mut next_page_token = String::new();

        loop {
            let mut request = self
                .http
                .get(format!("{}/v2/users/me/recordings", self.api_base))
                .bearer_auth(&token.access_token)
                .query(&[
                    ("page_size", LISTING_PAGE_SIZE),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                ]);

            if !next_page_token.is_empty() {
                request = request.query(&[("next_page_token", next_page_token.as_str())]);
            }

            let response = request.send().await?;

            if response.status() != StatusCode::OK {
                return Err(ClientError::UnexpectedStatus {
                    status: response.status(),
                    doing: "listing recordings",
                });
            }

            let page: RecordingsPage = response.json().await?;

            meetings.extend(page.meetings);

            if page.next_page_token.is_empty() {
                break;
            }
            trace!(next_page_token = %page.next_page_token, "Following listing pagination");
            next_page_token = page.next_page_token;

            self.throttle(RateTier::Medium).await?;
        }

        Ok(meetings)
    }

    /// All meetings, walking back from today in 30-day windows; two
    /// consecutive empty windows mean there is nothing earlier.
    pub async fn list_all_meetings(&self) -> Result<Vec<Meeting>, ClientError> {
        let today = Local::now().date_naive();

        let mut meetings = Vec::new();
        let mut empty = 0u32;
        let mut window = 0i64;

        while empty < 2 {
            window += 1;
            let from = today - chrono::Duration::days(window * LISTING_WINDOW_DAYS);
            let to = today - chrono::Duration::days((window - 1) * LISTING_WINDOW_DAYS);

            let chunk = self.list_interval_meetings(from, to).await?;

            if chunk.is_empty() {
                empty += 1;
            } else {
                empty = 0;
            }

            meetings.extend(chunk);
        }

        Ok(meetings)
    }

    /// [`list_all_meetings`](Self::list_all_meetings) with up to 10 attempts
    /// and an increasing delay between them.
    pub async fn list_all_meetings_with_retry(&self) -> Result<Vec<Meeting>, ClientError> {
        let mut last_error = None;

        for attempt in 0..LISTING_RETRY_LIMIT {
            match self.list_all_meetings().await {
                Ok(meetings) => return Ok(meetings),
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(e) => {
                    let delay = std::time::Duration::from_secs(30 * attempt);
                    warn!(error = format!("{e:#}"), attempt, ?delay, "Failed to list meetings, retrying");
                    last_error = Some(e);

                    let mut signal = self.shutdown_signal.clone();
                    if !signal.sleep(delay).await {
                        return Err(ClientError::Cancelled);
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::Config("listing retries exhausted")))
    }

    /// Cloud-side storage usage between two `yyyy-mm-dd` dates. Heavy tier.
    pub async fn cloud_storage_report(&self, from: &str, to: &str) -> Result<CloudRecordingReport, ClientError> {
        let token = self.get_token().await?;

        let response = self
            .http
            .get(format!("{}/v2/report/cloud_recording", self.api_base))
            .bearer_auth(&token.access_token)
            .query(&[("from", from), ("to", to)])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ClientError::UnexpectedStatus {
                status: response.status(),
                doing: "fetching the cloud storage report",
            });
        }

        let report = response.json().await?;

        self.throttle(RateTier::Heavy).await?;

        Ok(report)
    }

    /// Removes every cloud-side recording of a meeting.
    ///
    /// The action is `delete` only when both the `delete` argument and the
    /// `delete_downloaded` policy agree; `trash` otherwise. Light tier.
    pub async fn delete_meeting_recordings(&self, meeting_uuid: &str, delete: bool) -> Result<(), ClientError> {
        if !self.conf.delete_downloaded && !self.conf.trash_downloaded && !self.conf.delete_skipped {
            return Err(ClientError::Config("both delete_downloaded and trash_downloaded are disabled"));
        }

        let token = self.get_token().await?;

        let action = if delete && self.conf.delete_downloaded {
            "delete"
        } else {
            "trash"
        };

        // The vendor requires double encoding for UUIDs starting with '/' or
        // containing '//'; it accepts double encoding for every UUID, so
        // apply it unconditionally.
        let encoded_uuid = urlencoding::encode(urlencoding::encode(meeting_uuid).as_ref()).into_owned();

        let url = format!("{}/v2/meetings/{}/recordings", self.api_base, encoded_uuid);

        debug!(%url, action, "Deleting cloud-side recordings");

        let response = self
            .http
            .delete(url)
            .bearer_auth(&token.access_token)
            .query(&[("action", action)])
            .send()
            .await?;

        // 404 means the recordings are already gone or trashed.
        if response.status() != StatusCode::NO_CONTENT && response.status() != StatusCode::NOT_FOUND {
            return Err(ClientError::UnexpectedStatus {
                status: response.status(),
                doing: "deleting recordings",
            });
        }

        self.throttle(RateTier::Light).await?;

        Ok(())
    }

    /// Deletes cloud-side recordings of the oldest meetings once the
    /// accumulated size exceeds `cap`. Returns how many meetings were deleted.
    pub async fn delete_over_capacity(&self, cap: FileSize) -> Result<usize, ClientError> {
        if cap.as_bytes() == 0 {
            return Err(ClientError::Config("cloud storage capacity is not configured"));
        }
        debug!(%cap, "Cloud storage capacity limit");

        let mut meetings = self.list_all_meetings_with_retry().await?;

        // Most recent first: the newest meetings fill the capacity budget,
        // everything past it is deleted.
        meetings.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        let mut size_accum = FileSize(0);
        let mut deleted = 0;

        for meeting in &meetings {
            for record in &meeting.records {
                size_accum += record.file_size;
            }

            if size_accum > cap {
                debug!(used = %size_accum, uuid = %meeting.uuid, "Capacity reached, deleting");

                match self.delete_meeting_recordings(&meeting.uuid, true).await {
                    Ok(()) => deleted += 1,
                    Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                    Err(e) => warn!(error = format!("{e:#}"), uuid = %meeting.uuid, "Failed to delete recordings"),
                }
            } else {
                trace!(used = %size_accum, uuid = %meeting.uuid, "Within capacity");
            }
        }

        Ok(deleted)
    }
}
