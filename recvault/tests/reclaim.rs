//! Free-space guard: eviction order, status transitions, folder cleanup.

use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{DateTime, Local, TimeZone as _};
use meeting_store::model::{FileSize, Meeting, Record, RecordStatus, RecordType};
use meeting_store::{DynMeetingStore, MeetingStore as _};
use meeting_store_libsql::{libsql, LibSqlMeetingStore};
use recvault::reclaim::Reclaimer;

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

fn at(hour: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2023, 6, 2, hour, 0, 0).single().expect("valid time")
}

fn record(id: &str, start: DateTime<Local>) -> Record {
    Record {
        id: id.to_owned(),
        meeting_id: "uuid-1".to_owned(),
        kind: RecordType::AudioOnly,
        start_time: start,
        file_extension: "M4A".to_owned(),
        file_size: FileSize(4),
        download_url: String::new(),
        play_url: String::new(),
        status: RecordStatus::Queued,
        path: String::new(),
    }
}

/// Writes the artifact for `record` under `repo` and flips it to
/// `downloaded`, the way the download driver would have.
async fn materialize(store: &DynMeetingStore, repo: &Utf8PathBuf, record: &Record) -> Utf8PathBuf {
    let folder = repo.join(record.date_folder()).join(&record.id);
    std::fs::create_dir_all(&folder).expect("create record folder");

    let path = folder.join(format!("{}.m4a", record.id));
    std::fs::write(&path, b"test").expect("write artifact");

    store
        .update_record(&record.id, RecordStatus::Downloaded, path.as_str())
        .await
        .expect("update");

    path
}

async fn seed(store: &DynMeetingStore, repo: &Utf8PathBuf) -> Vec<Utf8PathBuf> {
    let records = vec![record("Id1", at(9)), record("Id2", at(10)), record("Id3", at(11))];

    let meeting = Meeting {
        uuid: "uuid-1".to_owned(),
        id: 11_122_223_333,
        topic: "testTopic".to_owned(),
        start_time: at(9),
        duration: 30,
        records: records.clone(),
    };

    store.save_meeting(&meeting).await.expect("save");

    let mut paths = Vec::new();
    for record in &records {
        paths.push(materialize(store, repo, record).await);
    }
    paths
}

#[tokio::test]
async fn enough_free_space_is_a_noop() {
    let repo_dir = tempfile::tempdir().expect("tempdir");
    let repo = Utf8PathBuf::from_path_buf(repo_dir.path().to_path_buf()).expect("utf-8 path");

    let store = open_store().await;
    let paths = seed(&store, &repo).await;

    // One free byte is certainly available.
    let reclaimer = Reclaimer::new(Arc::clone(&store), repo, 1);

    let report = reclaimer.free_up_space().await.expect("reclaim");

    assert_eq!(report.deleted, 0);
    assert!(report.errors.is_empty());
    assert!(store
        .get_records_by_status(RecordStatus::Deleted)
        .await
        .expect("by status")
        .is_empty());

    for path in &paths {
        assert!(path.exists());
    }
}

#[tokio::test]
async fn low_free_space_evicts_oldest_first() {
    let repo_dir = tempfile::tempdir().expect("tempdir");
    let repo = Utf8PathBuf::from_path_buf(repo_dir.path().to_path_buf()).expect("utf-8 path");

    let store = open_store().await;
    let paths = seed(&store, &repo).await;

    // No volume has this much room: every downloaded record must go.
    let reclaimer = Reclaimer::new(Arc::clone(&store), repo.clone(), u64::MAX);

    let report = reclaimer.free_up_space().await.expect("reclaim");

    assert_eq!(report.deleted, 3);
    assert!(report.errors.is_empty());

    let deleted = store
        .get_records_by_status(RecordStatus::Deleted)
        .await
        .expect("by status");
    assert_eq!(deleted.len(), 3);
    assert!(deleted.iter().all(|r| r.path.is_empty()));

    for path in &paths {
        assert!(!path.exists());
    }

    // The orphaned date folder went with the last record.
    assert!(!repo.join("2023-06-02").exists());
}

#[tokio::test]
async fn only_downloaded_records_are_considered() {
    let repo_dir = tempfile::tempdir().expect("tempdir");
    let repo = Utf8PathBuf::from_path_buf(repo_dir.path().to_path_buf()).expect("utf-8 path");

    let store = open_store().await;

    let queued = record("Id1", at(9));
    let meeting = Meeting {
        uuid: "uuid-1".to_owned(),
        id: 1,
        topic: "testTopic".to_owned(),
        start_time: at(9),
        duration: 30,
        records: vec![queued.clone()],
    };
    store.save_meeting(&meeting).await.expect("save");

    // The artifact folder exists, but the record never reached `downloaded`.
    let folder = repo.join(queued.date_folder()).join(&queued.id);
    std::fs::create_dir_all(&folder).expect("create record folder");
    let path = folder.join("Id1.m4a");
    std::fs::write(&path, b"test").expect("write artifact");

    let reclaimer = Reclaimer::new(Arc::clone(&store), repo, u64::MAX);

    let report = reclaimer.free_up_space().await.expect("reclaim");

    assert_eq!(report.deleted, 0);
    assert!(path.exists());

    let records = store.get_records("uuid-1").await.expect("records");
    assert_eq!(records[0].status, RecordStatus::Queued);
}
