#[macro_use]
extern crate tracing;

use std::collections::HashMap;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use libsql::Connection;
use meeting_store::model::{FileSize, Meeting, Record, RecordStatus, RecordType, StatusStats, SQL_TIME_FORMAT};
use meeting_store::{MeetingStore, StoreError};

#[rustfmt::skip]
pub use libsql;

/// Implementation of [`MeetingStore`] using libSQL as the backend.
///
/// All writes serialize through the single SQLite writer; the store adds no
/// locking of its own. Timestamps are persisted as local
/// `YYYY-MM-DD HH:MM:SS` text so that lexicographic ordering matches
/// chronological ordering.
///
/// We use the 'user_version' value to store the migration state.
/// It's a very lightweight approach as it is just an integer at a fixed
/// offset in the SQLite file.
/// - <https://sqlite.org/pragma.html#pragma_user_version>
pub struct LibSqlMeetingStore {
    conn: Connection,
}

impl LibSqlMeetingStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn apply_pragmas(&self) -> anyhow::Result<()> {
        const PRAGMAS: &str = "
            -- Write-ahead log instead of a rollback journal; safe with
            -- synchronous = NORMAL and friendlier to concurrent readers.
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Wait for a locked resource instead of failing with SQLITE_BUSY.
            PRAGMA busy_timeout = 15000;

            -- Allow more pages to be cached in memory (3MB).
            PRAGMA cache_size = -3000;

            -- Reclaim disk space gradually as rows are deleted.
            PRAGMA auto_vacuum = INCREMENTAL;

            PRAGMA temp_store = MEMORY;
        ";

        trace!(sql_query = %PRAGMAS, "PRAGMAs query");

        let mut batch_rows = self
            .conn
            .execute_batch(PRAGMAS)
            .await
            .context("failed to batch execute SQL query")?;

        while let Some(rows) = batch_rows.next_stmt_row() {
            let Some(mut rows) = rows else {
                continue;
            };

            while let Ok(Some(row)) = rows.next().await {
                trace!(?row, "PRAGMA row");
            }
        }

        Ok(())
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let user_version = self.query_user_version().await?;

        match MIGRATIONS.get(user_version..) {
            Some(remaining) if !remaining.is_empty() => {
                info!(
                    user_version,
                    migration_count = MIGRATIONS.len() - user_version,
                    "Start migration"
                );

                for (sql_query, migration_id) in remaining.iter().zip(user_version..MIGRATIONS.len()) {
                    trace!(migration_id, %sql_query, "Apply migration");

                    self.conn
                        .execute_batch(sql_query)
                        .await
                        .with_context(|| format!("failed to execute migration {migration_id}"))?;

                    self.update_user_version(migration_id + 1)
                        .await
                        .context("failed to update user version")?;
                }

                info!("Migration complete");
            }
            None => {
                warn!(user_version, "user_version is set to an unexpected value");
            }
            _ => {
                debug!(user_version, "Database is already up to date");
            }
        }

        Ok(())
    }

    async fn query_user_version(&self) -> anyhow::Result<usize> {
        let row = self
            .conn
            .query("PRAGMA user_version", ())
            .await
            .context("failed to execute SQL query")?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        let value = row.get::<u64>(0).context("failed to read user_version value")?;

        Ok(usize::try_from(value).context("user_version is too big")?)
    }

    async fn update_user_version(&self, value: usize) -> anyhow::Result<()> {
        let value = u64::try_from(value).context("user_version is too big")?;

        self.conn
            .execute(&format!("PRAGMA user_version = {value}"), ())
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }

    async fn query_meetings(&self, sql_query: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Meeting>, StoreError> {
        let mut rows = self
            .conn
            .query(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        let mut meetings = Vec::new();

        while let Some(row) = rows.next().await.context("failed to read the row")? {
            let model = libsql::de::from_row::<MeetingRow>(&row).context("failed to read meeting row")?;
            meetings.push(model.into_meeting()?);
        }

        Ok(meetings)
    }

    async fn query_records(&self, sql_query: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Record>, StoreError> {
        let mut rows = self
            .conn
            .query(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        let mut records = Vec::new();

        while let Some(row) = rows.next().await.context("failed to read the row")? {
            let model = libsql::de::from_row::<RecordRow>(&row).context("failed to read record row")?;
            records.push(model.into_record()?);
        }

        Ok(records)
    }
}

#[async_trait]
impl MeetingStore for LibSqlMeetingStore {
    async fn setup(&self) -> Result<(), StoreError> {
        self.apply_pragmas().await?;
        self.migrate().await?;
        Ok(())
    }

    async fn save_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .await
            .context("failed to begin transaction")?;

        let sql_query = "INSERT INTO meetings (uuid, id, topic, start_time)
            VALUES (:uuid, :id, :topic, :start_time)";

        let params = (
            (":uuid", meeting.uuid.as_str()),
            (":id", i64::try_from(meeting.id).unwrap_or(i64::MAX)),
            (":topic", meeting.topic.as_str()),
            (":start_time", meeting.start_time_sql()),
        );

        trace!(%sql_query, uuid = %meeting.uuid, "Inserting meeting");

        tx.execute(sql_query, params).await.map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed") {
                StoreError::Conflict(meeting.uuid.clone())
            } else {
                StoreError::Internal(anyhow::Error::new(e).context("failed to insert meeting"))
            }
        })?;

        for record in &meeting.records {
            let sql_query = "INSERT INTO records
                (id, meeting_id, kind, start_time, file_extension, file_size,
                 download_url, play_url, status, path)
                VALUES (:id, :meeting_id, :kind, :start_time, :file_extension,
                 :file_size, :download_url, :play_url, :status, :path)";

            // The owning UUID comes from the meeting row, and every new
            // record enters the queue regardless of what the feed said.
            let params = (
                (":id", record.id.as_str()),
                (":meeting_id", meeting.uuid.as_str()),
                (":kind", record.kind.as_str()),
                (":start_time", record.start_time_sql()),
                (":file_extension", record.file_extension.as_str()),
                (":file_size", i64::try_from(record.file_size.as_bytes()).unwrap_or(i64::MAX)),
                (":download_url", record.download_url.as_str()),
                (":play_url", record.play_url.as_str()),
                (":status", RecordStatus::Queued.as_str()),
                (":path", ""),
            );

            tx.execute(sql_query, params)
                .await
                .with_context(|| format!("failed to insert record {}", record.id))?;
        }

        tx.commit().await.context("failed to commit transaction")?;

        Ok(())
    }

    async fn get_meeting(&self, uuid: &str) -> Result<Meeting, StoreError> {
        let sql_query = "SELECT uuid, id, topic, start_time FROM meetings WHERE uuid = :uuid";

        let mut rows = self
            .conn
            .query(sql_query, [(":uuid", uuid)])
            .await
            .context("failed to execute SQL query")?;

        let Some(row) = rows.next().await.context("failed to read the row")? else {
            return Err(StoreError::NotFound);
        };

        let model = libsql::de::from_row::<MeetingRow>(&row).context("failed to read meeting row")?;

        model.into_meeting()
    }

    async fn get_meetings(&self) -> Result<Vec<Meeting>, StoreError> {
        self.query_meetings(
            "SELECT uuid, id, topic, start_time FROM meetings ORDER BY start_time DESC",
            (),
        )
        .await
    }

    async fn list_watchable_meetings(&self) -> Result<Vec<Meeting>, StoreError> {
        let sql_query = "SELECT uuid, id, topic, start_time FROM meetings
            WHERE EXISTS (
                SELECT 1 FROM records
                WHERE records.meeting_id = meetings.uuid
                    AND records.status = :status
                    AND LOWER(records.file_extension) = 'mp4'
            )
            ORDER BY start_time DESC";

        self.query_meetings(sql_query, [(":status", RecordStatus::Downloaded.as_str())])
            .await
    }

    async fn get_records(&self, meeting_uuid: &str) -> Result<Vec<Record>, StoreError> {
        let sql_query = "SELECT id, meeting_id, kind, start_time, file_extension, file_size,
                download_url, play_url, status, path
            FROM records WHERE meeting_id = :meeting_id
            ORDER BY start_time ASC, id ASC";

        self.query_records(sql_query, [(":meeting_id", meeting_uuid)]).await
    }

    async fn get_records_by_status(&self, status: RecordStatus) -> Result<Vec<Record>, StoreError> {
        let sql_query = "SELECT id, meeting_id, kind, start_time, file_extension, file_size,
                download_url, play_url, status, path
            FROM records WHERE status = :status
            ORDER BY start_time ASC, id ASC";

        self.query_records(sql_query, [(":status", status.as_str())]).await
    }

    async fn get_queued_record(&self) -> Result<Record, StoreError> {
        let sql_query = "SELECT id, meeting_id, kind, start_time, file_extension, file_size,
                download_url, play_url, status, path
            FROM records WHERE status = :status
            ORDER BY start_time ASC, id ASC
            LIMIT 1";

        let mut records = self
            .query_records(sql_query, [(":status", RecordStatus::Queued.as_str())])
            .await?;

        match records.pop() {
            Some(record) => Ok(record),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_record(&self, id: &str, status: RecordStatus, path: &str) -> Result<(), StoreError> {
        let sql_query = "UPDATE records SET status = :status, path = :path WHERE id = :id";

        let params = ((":status", status.as_str()), (":path", path), (":id", id));

        trace!(%id, %status, %path, "Updating record");

        self.conn
            .execute(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }

    async fn reset_failed_records(&self) -> Result<u64, StoreError> {
        let sql_query = "UPDATE records SET status = :queued
            WHERE status = :failed OR status = :downloading";

        let params = (
            (":queued", RecordStatus::Queued.as_str()),
            (":failed", RecordStatus::Failed.as_str()),
            (":downloading", RecordStatus::Downloading.as_str()),
        );

        let changed_count = self
            .conn
            .execute(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        trace!(changed_count, "Records put back to the queue");

        Ok(changed_count)
    }

    async fn delete_meeting(&self, uuid: &str) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .await
            .context("failed to begin transaction")?;

        tx.execute("DELETE FROM records WHERE meeting_id = :uuid", [(":uuid", uuid)])
            .await
            .context("failed to delete records")?;

        tx.execute("DELETE FROM meetings WHERE uuid = :uuid", [(":uuid", uuid)])
            .await
            .context("failed to delete meeting")?;

        tx.commit().await.context("failed to commit transaction")?;

        Ok(())
    }

    async fn stats(&self) -> Result<HashMap<RecordStatus, StatusStats>, StoreError> {
        let sql_query = "SELECT status, COALESCE(SUM(file_size), 0) AS size, COUNT(*) AS count
            FROM records GROUP BY status";

        let mut rows = self
            .conn
            .query(sql_query, ())
            .await
            .context("failed to execute SQL query")?;

        let mut stats = HashMap::new();

        while let Some(row) = rows.next().await.context("failed to read the row")? {
            let status = row.get::<String>(0).context("failed to read status value")?;
            let size = row.get::<i64>(1).context("failed to read size value")?;
            let count = row.get::<i64>(2).context("failed to read count value")?;

            let status: RecordStatus = status.parse().map_err(StoreError::Internal)?;

            stats.insert(
                status,
                StatusStats::new(u64::try_from(size).unwrap_or(0), u64::try_from(count).unwrap_or(0)),
            );
        }

        Ok(stats)
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
struct MeetingRow {
    uuid: String,
    id: i64,
    topic: String,
    start_time: String,
}

impl MeetingRow {
    fn into_meeting(self) -> Result<Meeting, StoreError> {
        Ok(Meeting {
            uuid: self.uuid,
            id: u64::try_from(self.id).unwrap_or(0),
            topic: self.topic,
            start_time: parse_sql_time(&self.start_time)?,
            // Duration is not persisted; it only matters before insertion,
            // when the selector filters the feed.
            duration: 0,
            records: Vec::new(),
        })
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
struct RecordRow {
    id: String,
    meeting_id: String,
    kind: String,
    start_time: String,
    file_extension: String,
    file_size: i64,
    download_url: String,
    play_url: String,
    status: String,
    path: String,
}

impl RecordRow {
    fn into_record(self) -> Result<Record, StoreError> {
        Ok(Record {
            id: self.id,
            meeting_id: self.meeting_id,
            kind: RecordType::from(self.kind),
            start_time: parse_sql_time(&self.start_time)?,
            file_extension: self.file_extension,
            file_size: FileSize(u64::try_from(self.file_size).unwrap_or(0)),
            download_url: self.download_url,
            play_url: self.play_url,
            status: self.status.parse().map_err(StoreError::Internal)?,
            path: self.path,
        })
    }
}

fn parse_sql_time(text: &str) -> Result<DateTime<Local>, StoreError> {
    let naive = NaiveDateTime::parse_from_str(text, SQL_TIME_FORMAT)
        .with_context(|| format!("invalid stored timestamp: {text}"))?;

    naive
        .and_local_timezone(Local)
        .earliest()
        .with_context(|| format!("stored timestamp has no local representation: {text}"))
        .map_err(StoreError::Internal)
}

// Migrations should not be modified once released; only append to this list.
const MIGRATIONS: &[&str] = &[
    // Migration 0
    "CREATE TABLE meetings (
        uuid TEXT NOT NULL PRIMARY KEY,
        id INT NOT NULL,
        topic TEXT NOT NULL,
        start_time TEXT NOT NULL
    ) STRICT;

    CREATE TABLE records (
        id TEXT NOT NULL PRIMARY KEY,
        meeting_id TEXT NOT NULL REFERENCES meetings(uuid),
        kind TEXT NOT NULL,
        start_time TEXT NOT NULL,
        file_extension TEXT NOT NULL,
        file_size INT NOT NULL,
        download_url TEXT NOT NULL,
        play_url TEXT NOT NULL,
        status TEXT NOT NULL,
        path TEXT NOT NULL
    ) STRICT;

    CREATE INDEX idx_records_status ON records(status);
    CREATE INDEX idx_records_start_time ON records(start_time);
    CREATE INDEX idx_records_meeting_id ON records(meeting_id);",
];
