//! Priority-based filtering of a meeting's records.

use std::collections::HashSet;

use meeting_store::model::{Meeting, Record, RecordType};

use crate::config::dto::SyncableConf;

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Records worth downloading, in priority order.
    Keep(Vec<Record>),
    /// The meeting is shorter than the configured minimum.
    SkipDuration,
    /// Nothing in the meeting matches a configured category.
    SkipEmpty,
}

/// Pure record filter.
///
/// Important and Alternative are mutually exclusive at the meeting level:
/// when any Important record is present, Alternative ones are dropped (no
/// point in storing both the speaker view and the gallery view). Optional
/// records are additive.
#[derive(Debug, Clone)]
pub struct Selector {
    important: HashSet<RecordType>,
    alternative: HashSet<RecordType>,
    optional: HashSet<RecordType>,
    min_duration: i64,
}

impl Selector {
    pub fn from_conf(conf: &SyncableConf) -> Self {
        let as_set = |kinds: &[String]| {
            kinds
                .iter()
                .map(|kind| RecordType::from(kind.as_str()))
                .collect::<HashSet<_>>()
        };

        Selector {
            important: as_set(&conf.important),
            alternative: as_set(&conf.alternative),
            optional: as_set(&conf.optional),
            min_duration: conf.min_duration,
        }
    }

    /// True when no category is configured at all; the sync driver does not
    /// run in that case.
    pub fn is_empty(&self) -> bool {
        self.important.is_empty() && self.alternative.is_empty() && self.optional.is_empty()
    }

    pub fn select(&self, meeting: &Meeting) -> Selection {
        if meeting.duration < self.min_duration {
            return Selection::SkipDuration;
        }

        let mut important = Vec::new();
        let mut alternative = Vec::new();
        let mut optional = Vec::new();

        // Records matching no category are discarded.
        for record in &meeting.records {
            if self.important.contains(&record.kind) {
                important.push(record.clone());
            }
            if self.alternative.contains(&record.kind) {
                alternative.push(record.clone());
            }
            if self.optional.contains(&record.kind) {
                optional.push(record.clone());
            }
        }

        let mut keep = if important.is_empty() { alternative } else { important };
        keep.extend(optional);

        if keep.is_empty() {
            Selection::SkipEmpty
        } else {
            Selection::Keep(keep)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone as _};
    use meeting_store::model::{FileSize, RecordStatus};
    use rstest::rstest;

    fn record(id: &str, kind: &str) -> Record {
        Record {
            id: id.to_owned(),
            meeting_id: "uuid-1".to_owned(),
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

    fn meeting(duration: i64, kinds: &[&str]) -> Meeting {
        Meeting {
            uuid: "uuid-1".to_owned(),
            id: 1,
            topic: "topic".to_owned(),
            start_time: Local.with_ymd_and_hms(2023, 6, 2, 9, 0, 0).single().expect("valid time"),
            duration,
            records: kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| record(&format!("r{i}"), kind))
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

    fn kept_kinds(selection: Selection) -> Vec<String> {
        match selection {
            Selection::Keep(records) => records.into_iter().map(|r| r.kind.as_str().to_owned()).collect(),
            other => panic!("expected kept records, got {other:?}"),
        }
    }

    #[test]
    fn important_wins_over_alternative() {
        let m = meeting(
            30,
            &["shared_screen_with_speaker_view", "shared_screen_with_gallery_view", "chat_file"],
        );

        assert_eq!(
            kept_kinds(selector().select(&m)),
            vec!["shared_screen_with_speaker_view", "chat_file"],
        );
    }

    #[test]
    fn alternative_is_the_fallback() {
        let m = meeting(30, &["shared_screen_with_gallery_view", "chat_file"]);

        assert_eq!(
            kept_kinds(selector().select(&m)),
            vec!["shared_screen_with_gallery_view", "chat_file"],
        );
    }

    #[rstest]
    #[case(5)]
    #[case(9)]
    fn too_short_meetings_are_skipped(#[case] duration: i64) {
        let m = meeting(duration, &["shared_screen_with_speaker_view"]);
        assert_eq!(selector().select(&m), Selection::SkipDuration);
    }

    #[test]
    fn unmatched_kinds_are_discarded() {
        let m = meeting(30, &["audio_only", "timeline"]);
        assert_eq!(selector().select(&m), Selection::SkipEmpty);
    }

    #[test]
    fn optional_alone_is_enough() {
        let m = meeting(30, &["chat_file"]);
        assert_eq!(kept_kinds(selector().select(&m)), vec!["chat_file"]);
    }

    #[test]
    fn empty_configuration_is_reported() {
        let empty = Selector::from_conf(&SyncableConf::default());
        assert!(empty.is_empty());
        assert!(!selector().is_empty());
    }
}
