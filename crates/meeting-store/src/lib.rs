//! Domain model and persistence contract for the recording index.
//!
//! The index tracks meetings observed in the vendor feed and the per-record
//! download lifecycle. Multiple backends are allowed; the contract is the
//! [`MeetingStore`] capability set below.

pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Meeting, Record, RecordStatus, StatusStats};

pub type DynMeetingStore = Arc<dyn MeetingStore>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist.
    ///
    /// This is a first-class sentinel: the sync driver uses it to detect new
    /// meetings and the download driver uses it to detect an empty queue.
    #[error("no rows")]
    NotFound,

    /// A meeting with the same UUID is already indexed.
    #[error("meeting {0} is already indexed")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

#[async_trait]
pub trait MeetingStore: Send + Sync {
    /// Performs initial setup required before actually using the store.
    ///
    /// This function should be called first, before using any of the other
    /// functions.
    async fn setup(&self) -> Result<(), StoreError>;

    /// Inserts the meeting and all of its records in one transactional unit.
    ///
    /// New records are persisted with status [`RecordStatus::Queued`].
    /// Fails with [`StoreError::Conflict`] when the UUID is already indexed.
    async fn save_meeting(&self, meeting: &Meeting) -> Result<(), StoreError>;

    async fn get_meeting(&self, uuid: &str) -> Result<Meeting, StoreError>;

    /// All meetings, most recent first.
    async fn get_meetings(&self) -> Result<Vec<Meeting>, StoreError>;

    /// The "watchable" view: meetings having at least one `downloaded` record
    /// whose extension is `MP4` (compared case-insensitively), most recent
    /// first.
    async fn list_watchable_meetings(&self) -> Result<Vec<Meeting>, StoreError>;

    async fn get_records(&self, meeting_uuid: &str) -> Result<Vec<Record>, StoreError>;

    /// Records in the given status, oldest first.
    async fn get_records_by_status(&self, status: RecordStatus) -> Result<Vec<Record>, StoreError>;

    /// The single queued record with the earliest start time (ties broken by
    /// id ascending), or [`StoreError::NotFound`] when the queue is empty.
    async fn get_queued_record(&self) -> Result<Record, StoreError>;

    /// Atomically updates both the status and the local path of a record.
    async fn update_record(&self, id: &str, status: RecordStatus, path: &str) -> Result<(), StoreError>;

    /// Puts every `failed` and `downloading` record back to `queued`.
    ///
    /// Used at startup and whenever the queue drains, so that no record stays
    /// in `downloading` across a crash. Returns the number of rows changed.
    async fn reset_failed_records(&self) -> Result<u64, StoreError>;

    /// Removes the records first, then the meeting, in one transactional unit.
    async fn delete_meeting(&self, uuid: &str) -> Result<(), StoreError>;

    /// Aggregate size and count per record status.
    async fn stats(&self) -> Result<HashMap<RecordStatus, StatusStats>, StoreError>;
}
