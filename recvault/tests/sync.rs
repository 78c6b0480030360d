//! Feed synchronization: selector filtering, skip policies, idempotence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use chrono::{Local, TimeZone as _};
use meeting_store::model::{FileSize, Meeting, Record, RecordStatus, RecordType};
use meeting_store::{DynMeetingStore, MeetingStore as _};
use meeting_store_libsql::{libsql, LibSqlMeetingStore};
use recvault::client::ZoomClient;
use recvault::config::dto::{ClientConf, RateLimitingDelay, SyncableConf};
use recvault::selector::Selector;
use recvault::sync::Syncer;
use recvault::task::ShutdownHandle;

async fn open_store() -> DynMeetingStore {
    let database = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .expect("build in-memory database");
    let conn = database.connect().expect("open database connection");

    let store = LibSqlMeetingStore::new(conn);
    store.setup().await.expect("setup");

    Arc::new(store)
}

type Deletions = Arc<Mutex<Vec<(String, String)>>>;

/// Mock vendor accepting deletions; records (uuid, action) pairs.
async fn spawn_vendor(deletions: Deletions) -> String {
    async fn remove(
        State(deletions): State<Deletions>,
        Path(uuid): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> axum::http::StatusCode {
        let action = params.get("action").cloned().unwrap_or_default();
        deletions.lock().expect("not poisoned").push((uuid, action));
        axum::http::StatusCode::NO_CONTENT
    }

    let router = Router::new()
        .route(
            "/oauth/token",
            post(|| async { Json(serde_json::json!({"access_token": "tok", "expires_in": 3600})) }),
        )
        .route("/v2/meetings/{uuid}/recordings", delete(remove))
        .with_state(deletions);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind an ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    format!("http://{addr}")
}

fn record(id: &str, kind: &str) -> Record {
    Record {
        id: id.to_owned(),
        meeting_id: String::new(),
        kind: RecordType::from(kind),
        start_time: Local.with_ymd_and_hms(2023, 6, 2, 9, 0, 0).single().expect("valid time"),
        file_extension: "MP4".to_owned(),
        file_size: FileSize(1024),
        download_url: String::new(),
        play_url: String::new(),
        status: RecordStatus::Queued,
        path: String::new(),
    }
}

fn meeting(uuid: &str, duration: i64, kinds: &[&str]) -> Meeting {
    Meeting {
        uuid: uuid.to_owned(),
        id: 1,
        topic: "topic".to_owned(),
        start_time: Local.with_ymd_and_hms(2023, 6, 2, 9, 0, 0).single().expect("valid time"),
        duration,
        records: kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| record(&format!("{uuid}-r{i}"), kind))
            .collect(),
    }
}

fn selector() -> Selector {
    Selector::from_conf(&SyncableConf {
        important: vec!["shared_screen_with_speaker_view".to_owned()],
        alternative: vec!["shared_screen_with_gallery_view".to_owned()],
        optional: vec!["chat_file".to_owned()],
        min_duration: 10,
    })
}

fn syncer(
    store: &DynMeetingStore,
    base: &str,
    delete_skipped: bool,
    delete_downloaded: bool,
) -> (Syncer, ShutdownHandle) {
    let conf = ClientConf {
        account_id: "acc".to_owned(),
        id: "cid".to_owned(),
        secret: "shhh".to_owned(),
        delete_downloaded,
        trash_downloaded: false,
        delete_skipped,
        cloud_capacity_hard_limit: 0,
        rate_limiting_delay: RateLimitingDelay {
            light: 1,
            medium: 1,
            heavy: 1,
        },
    };

    let (handle, signal) = ShutdownHandle::new();

    let client = Arc::new(
        ZoomClient::builder()
            .conf(conf)
            .shutdown_signal(signal)
            .oauth_base(base.to_owned())
            .api_base(base.to_owned())
            .build(),
    );

    (
        Syncer::new(Arc::clone(store), client, selector(), delete_skipped, delete_downloaded),
        handle,
    )
}

#[tokio::test]
async fn new_meetings_are_saved_with_filtered_records() {
    let deletions: Deletions = Arc::default();
    let base = spawn_vendor(Arc::clone(&deletions)).await;

    let store = open_store().await;
    let (syncer, _handle) = syncer(&store, &base, false, false);

    let feed = vec![meeting(
        "m1",
        30,
        &["shared_screen_with_speaker_view", "shared_screen_with_gallery_view", "chat_file"],
    )];

    let outcome = syncer.sync_meetings(&feed).await.expect("sync");

    assert_eq!(outcome.saved, 1);
    assert_eq!(outcome.skip_exists, 0);

    // The gallery view lost to the speaker view; the chat came along.
    let records = store.get_records("m1").await.expect("records");
    let kinds: Vec<_> = records.iter().map(|r| r.kind.clone()).collect();
    assert_eq!(records.len(), 2);
    assert!(kinds.contains(&RecordType::SharedScreenWithSpeakerView));
    assert!(kinds.contains(&RecordType::ChatFile));
    assert!(records.iter().all(|r| r.status == RecordStatus::Queued));

    assert!(deletions.lock().expect("not poisoned").is_empty());
}

#[tokio::test]
async fn second_pass_skips_existing_meetings() {
    let deletions: Deletions = Arc::default();
    let base = spawn_vendor(Arc::clone(&deletions)).await;

    let store = open_store().await;
    let (syncer, _handle) = syncer(&store, &base, false, false);

    let feed = vec![meeting("m1", 30, &["shared_screen_with_speaker_view"])];

    syncer.sync_meetings(&feed).await.expect("first pass");
    let outcome = syncer.sync_meetings(&feed).await.expect("second pass");

    assert_eq!(outcome.saved, 0);
    assert_eq!(outcome.skip_exists, 1);
}

#[tokio::test]
async fn short_meetings_are_deleted_when_the_policy_says_so() {
    let deletions: Deletions = Arc::default();
    let base = spawn_vendor(Arc::clone(&deletions)).await;

    let store = open_store().await;
    let (syncer, _handle) = syncer(&store, &base, true, false);

    let feed = vec![meeting("m-short", 5, &["shared_screen_with_speaker_view"])];

    let outcome = syncer.sync_meetings(&feed).await.expect("sync");

    assert_eq!(outcome.skip_duration, 1);
    assert_eq!(outcome.saved, 0);
    assert!(matches!(
        store.get_meeting("m-short").await,
        Err(meeting_store::StoreError::NotFound),
    ));

    let calls = deletions.lock().expect("not poisoned").clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "m-short");
    // delete_downloaded is off, so the soft action is used.
    assert_eq!(calls[0].1, "trash");
}

#[tokio::test]
async fn unmatched_meetings_count_as_empty() {
    let deletions: Deletions = Arc::default();
    let base = spawn_vendor(Arc::clone(&deletions)).await;

    let store = open_store().await;
    let (syncer, _handle) = syncer(&store, &base, false, false);

    let feed = vec![meeting("m1", 30, &["timeline"])];

    let outcome = syncer.sync_meetings(&feed).await.expect("sync");

    assert_eq!(outcome.skip_empty, 1);
    assert_eq!(outcome.saved, 0);
    // delete_skipped is off: nothing is deleted either.
    assert!(deletions.lock().expect("not poisoned").is_empty());
}
