//! Listing/info result type produced by every transport adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a [`FileItem`] is a regular file or a directory.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileItemType {
    File,
    Directory,
}

/// A single entry returned by `listFiles`/`getFileInfo`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileItemType,
    pub size: u64,
    #[serde(rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
    pub permissions: Option<String>,
    #[serde(rename = "isReadonly")]
    pub is_readonly: Option<bool>,
}

impl FileItem {
    /// Parse a wire-supplied timestamp, falling back to "now" on failure.
    ///
    /// Every adapter funnels raw listing timestamps through this so a
    /// `FileItem` never carries an unparseable `last_modified` (spec §3).
    pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
        raw.and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    s.parse::<i64>()
                        .ok()
                        .and_then(|millis| DateTime::from_timestamp_millis(millis))
                })
        })
        .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_rfc3339() {
        let ts = FileItem::parse_timestamp(Some("2024-01-02T03:04:05Z"));
        assert_eq!(ts.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn parse_timestamp_accepts_epoch_millis() {
        let ts = FileItem::parse_timestamp(Some("1704164645000"));
        assert_eq!(ts.timestamp(), 1_704_164_645);
    }

    #[test]
    fn parse_timestamp_falls_back_to_now_on_garbage() {
        let before = Utc::now();
        let ts = FileItem::parse_timestamp(Some("not-a-date"));
        assert!(ts >= before);
    }

    #[test]
    fn parse_timestamp_falls_back_to_now_on_missing() {
        let before = Utc::now();
        let ts = FileItem::parse_timestamp(None);
        assert!(ts >= before);
    }
}
