#[macro_use]
extern crate tracing;

pub mod api;
pub mod check;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod download;
pub mod fetch;
pub mod log;
pub mod reclaim;
pub mod selector;
pub mod storage;
pub mod sync;
pub mod task;

use std::sync::Arc;

use meeting_store::DynMeetingStore;

use crate::config::Conf;

/// State shared with the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub conf: Arc<Conf>,
    pub store: DynMeetingStore,
}
