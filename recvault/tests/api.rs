//! Peer coordination endpoint and status surface.

use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{Local, TimeZone as _};
use meeting_store::model::{FileSize, Meeting, Record, RecordStatus, RecordType};
use meeting_store::{DynMeetingStore, MeetingStore as _};
use meeting_store_libsql::{libsql, LibSqlMeetingStore};
use recvault::api;
use recvault::config::{dto, Conf};
use recvault::AppState;

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

fn record(id: &str, meeting: &str) -> Record {
    Record {
        id: id.to_owned(),
        meeting_id: meeting.to_owned(),
        kind: RecordType::AudioOnly,
        start_time: Local.with_ymd_and_hms(2023, 6, 2, 9, 0, 0).single().expect("valid time"),
        file_extension: "M4A".to_owned(),
        file_size: FileSize(4),
        download_url: String::new(),
        play_url: String::new(),
        status: RecordStatus::Queued,
        path: String::new(),
    }
}

fn meeting(uuid: &str, records: Vec<Record>) -> Meeting {
    Meeting {
        uuid: uuid.to_owned(),
        id: 1,
        topic: "topic".to_owned(),
        start_time: Local.with_ymd_and_hms(2023, 6, 2, 9, 0, 0).single().expect("valid time"),
        duration: 30,
        records,
    }
}

/// Two meetings: one fully on disk, one still queued.
async fn seed(store: &DynMeetingStore, repo: &Utf8PathBuf) {
    store
        .save_meeting(&meeting("loaded", vec![record("r1", "loaded")]))
        .await
        .expect("save");
    store
        .save_meeting(&meeting("pending", vec![record("r2", "pending")]))
        .await
        .expect("save");

    let folder = repo.join("2023-06-02").join("r1");
    std::fs::create_dir_all(&folder).expect("create folder");
    let path = folder.join("r1.m4a");
    std::fs::write(&path, b"test").expect("write artifact");

    store
        .update_record("r1", RecordStatus::Downloaded, path.as_str())
        .await
        .expect("update");
}

async fn spawn_api(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind an ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let router = api::make_router(state);

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    format!("http://{addr}")
}

async fn setup() -> (String, tempfile::TempDir) {
    let repo_dir = tempfile::tempdir().expect("tempdir");
    let repo = Utf8PathBuf::from_path_buf(repo_dir.path().to_path_buf()).expect("utf-8 path");

    let store = open_store().await;
    seed(&store, &repo).await;

    let yaml = format!(
        r#"
server:
  access_key_salt: pepper
storage:
  type: sqlite
  path: unused.db
  repository: {repo}
"#
    );
    let conf_file: dto::ConfFile = serde_yaml::from_str(&yaml).expect("valid YAML");
    let conf = Arc::new(Conf::from_conf_file(&conf_file).expect("valid config"));

    let base = spawn_api(AppState { conf, store }).await;

    (base, repo_dir)
}

#[tokio::test]
async fn loaded_meetings_get_an_ok() {
    let (base, _repo) = setup().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/meetingsLoaded/pepper"))
        .json(&serde_json::json!({"meetings": ["loaded"]}))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let answer: serde_json::Value = response.json().await.expect("json");
    assert_eq!(answer["result"], "ok");
}

#[tokio::test]
async fn missing_artifacts_answer_pending() {
    let (base, _repo) = setup().await;

    for meetings in [vec!["pending"], vec!["loaded", "pending"], vec!["unknown"]] {
        let response = reqwest::Client::new()
            .post(format!("{base}/meetingsLoaded/pepper"))
            .json(&serde_json::json!({"meetings": meetings}))
            .send()
            .await
            .expect("request");

        let answer: serde_json::Value = response.json().await.expect("json");
        assert_eq!(answer["result"], "pending");
    }
}

#[tokio::test]
async fn wrong_salt_is_forbidden() {
    let (base, _repo) = setup().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/meetingsLoaded/salt-and-vinegar"))
        .json(&serde_json::json!({"meetings": ["loaded"]}))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let (base, _repo) = setup().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/meetingsLoaded/pepper"))
        .json(&serde_json::json!({"meetings": ["loaded"], "mode": "force"}))
        .send()
        .await
        .expect("request");

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn status_reports_stats_per_status() {
    let (base, _repo) = setup().await;

    let response = reqwest::Client::new()
        .get(format!("{base}/status"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let answer: serde_json::Value = response.json().await.expect("json");
    assert_eq!(answer["status"], "OK");
    assert_eq!(answer["stats"]["queued"]["count"], 1);
    assert_eq!(answer["stats"]["downloaded"]["count"], 1);
}
