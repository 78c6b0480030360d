use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Text form used for timestamps persisted by the store.
///
/// Local time, sortable: lexicographic order matches chronological order.
pub const SQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Text form used for the per-day folders in the artifact repository.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A session produced by the upstream conferencing system.
///
/// The UUID is the sole key: numeric ids are observed to repeat across
/// distinct UUIDs in the vendor feed. A meeting is never mutated after
/// insert; it is removed only by `delete_meeting`, which cascades to its
/// records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub uuid: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub topic: String,
    #[serde(with = "rfc3339_local")]
    pub start_time: DateTime<Local>,
    /// Duration in minutes, as reported by the vendor.
    #[serde(default)]
    pub duration: i64,
    #[serde(rename = "recording_files", default)]
    pub records: Vec<Record>,
}

impl Meeting {
    pub fn start_time_sql(&self) -> String {
        self.start_time.format(SQL_TIME_FORMAT).to_string()
    }
}

/// A single downloadable artifact belonging to a meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub meeting_id: String,
    #[serde(rename = "recording_type", default)]
    pub kind: RecordType,
    #[serde(rename = "recording_start", with = "rfc3339_local")]
    pub start_time: DateTime<Local>,
    /// Case-sensitive in the vendor feed; compared case-insensitively against
    /// the downloaded filename suffix.
    #[serde(default)]
    pub file_extension: String,
    #[serde(default)]
    pub file_size: FileSize,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub play_url: String,
    /// Lifecycle position inside this system; the vendor-side `status` field
    /// is deliberately ignored on deserialization.
    #[serde(skip, default)]
    pub status: RecordStatus,
    /// Local filesystem path, empty until downloaded.
    #[serde(skip, default)]
    pub path: String,
}

impl Record {
    pub fn start_time_sql(&self) -> String {
        self.start_time.format(SQL_TIME_FORMAT).to_string()
    }

    /// Name of the per-day repository folder this record belongs to.
    pub fn date_folder(&self) -> String {
        self.start_time.format(DATE_FORMAT).to_string()
    }
}

/// Vendor-reported category of a record.
///
/// Anything the vendor reports beyond the four well-known variants is kept
/// verbatim in `Other` so the selector configuration can still match on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordType {
    AudioOnly,
    ChatFile,
    SharedScreenWithSpeakerView,
    SharedScreenWithGalleryView,
    Other(String),
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::AudioOnly => "audio_only",
            RecordType::ChatFile => "chat_file",
            RecordType::SharedScreenWithSpeakerView => "shared_screen_with_speaker_view",
            RecordType::SharedScreenWithGalleryView => "shared_screen_with_gallery_view",
            RecordType::Other(s) => s,
        }
    }
}

impl Default for RecordType {
    fn default() -> Self {
        RecordType::Other(String::new())
    }
}

impl From<String> for RecordType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "audio_only" => RecordType::AudioOnly,
            "chat_file" => RecordType::ChatFile,
            "shared_screen_with_speaker_view" => RecordType::SharedScreenWithSpeakerView,
            "shared_screen_with_gallery_view" => RecordType::SharedScreenWithGalleryView,
            _ => RecordType::Other(s),
        }
    }
}

impl From<&str> for RecordType {
    fn from(s: &str) -> Self {
        RecordType::from(s.to_owned())
    }
}

impl From<RecordType> for String {
    fn from(t: RecordType) -> Self {
        t.as_str().to_owned()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of a record.
///
/// Legal transitions: `queued → downloading → downloaded → deleted`, plus
/// `downloading → failed` on any mid-flight error; `failed` and `downloading`
/// are re-enterable into `queued` via `reset_failed_records`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Queued,
    Downloading,
    Downloaded,
    Failed,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Queued => "queued",
            RecordStatus::Downloading => "downloading",
            RecordStatus::Downloaded => "downloaded",
            RecordStatus::Failed => "failed",
            RecordStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RecordStatus::Queued),
            "downloading" => Ok(RecordStatus::Downloading),
            "downloaded" => Ok(RecordStatus::Downloaded),
            "failed" => Ok(RecordStatus::Failed),
            "deleted" => Ok(RecordStatus::Deleted),
            other => Err(anyhow::anyhow!("unknown record status: {other}")),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte count with a human-readable text form.
///
/// The vendor reports record sizes as JSON numbers, but the cloud storage
/// report uses strings such as `"1.2 TB"`; both deserialize into this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FileSize(pub u64);

impl FileSize {
    const UNITS: [(&'static str, u64); 5] = [
        ("TB", 1 << 40),
        ("GB", 1 << 30),
        ("MB", 1 << 20),
        ("KB", 1 << 10),
        ("B", 1),
    ];

    pub fn as_bytes(self) -> u64 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn parse_human(s: &str) -> Result<Self, String> {
        let s = s.trim();

        for (unit, mult) in Self::UNITS {
            if let Some(number) = s.strip_suffix(unit) {
                let number: f64 = number
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid file size: {s}"))?;
                return Ok(FileSize((number * mult as f64) as u64));
            }
        }

        // No unit suffix: a bare number of bytes.
        s.parse::<f64>()
            .map(|n| FileSize(n as u64))
            .map_err(|_| format!("invalid file size: {s}"))
    }
}

impl fmt::Display for FileSize {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, mult) in Self::UNITS {
            if self.0 >= mult && mult > 1 {
                let value = self.0 as f64 / mult as f64;
                let mut text = format!("{value:.2}");
                while text.ends_with('0') {
                    text.pop();
                }
                if text.ends_with('.') {
                    text.pop();
                }
                return write!(f, "{text} {unit}");
            }
        }
        write!(f, "{} B", self.0)
    }
}

impl From<u64> for FileSize {
    fn from(bytes: u64) -> Self {
        FileSize(bytes)
    }
}

impl std::ops::Add for FileSize {
    type Output = FileSize;

    fn add(self, rhs: FileSize) -> FileSize {
        FileSize(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for FileSize {
    fn add_assign(&mut self, rhs: FileSize) {
        self.0 += rhs.0;
    }
}

impl<'de> Deserialize<'de> for FileSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FileSizeVisitor;

        impl serde::de::Visitor<'_> for FileSizeVisitor {
            type Value = FileSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or a string like \"1.2 TB\"")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<FileSize, E> {
                Ok(FileSize(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<FileSize, E> {
                u64::try_from(v).map(FileSize).map_err(E::custom)
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<FileSize, E> {
                Ok(FileSize(v as u64))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<FileSize, E> {
                FileSize::parse_human(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(FileSizeVisitor)
    }
}

/// Aggregate size and count for one record status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStats {
    pub size_mb: u64,
    pub size_gb: u64,
    pub count: u64,
}

impl StatusStats {
    pub fn new(size_bytes: u64, count: u64) -> Self {
        StatusStats {
            size_mb: size_bytes / (1 << 20),
            size_gb: size_bytes / (1 << 30),
            count,
        }
    }
}

/// Cloud-side storage usage, as returned by the vendor report endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudRecordingReport {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub cloud_recording_storage: Vec<CloudRecordingStorage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudRecordingStorage {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub free_usage: FileSize,
    #[serde(default)]
    pub plan_usage: FileSize,
    #[serde(default)]
    pub usage: FileSize,
    #[serde(default)]
    pub usage_percent: u32,
}

/// RFC 3339 on the wire, process-local time in the domain.
mod rfc3339_local {
    use chrono::{DateTime, Local};
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(dt: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Local>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Local))
            .map_err(serde::de::Error::custom)
    }
}
