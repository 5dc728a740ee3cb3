//! Persisted verification records and their on-disk format.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle of one verification challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    /// A code was submitted and is being applied
    Processing,
    Completed,
    /// The last code was rejected; another may be submitted
    #[serde(alias = "error")]
    Failed,
    Cancelled,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Processing => "processing",
            VerificationStatus::Completed => "completed",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Cancelled => "cancelled",
        }
    }

    /// Whether an operator can still act on the record.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Pending | VerificationStatus::Processing | VerificationStatus::Failed
        )
    }

    /// Whether a code may be submitted in this state.
    pub fn accepts_code(&self) -> bool {
        matches!(self, VerificationStatus::Pending | VerificationStatus::Failed)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the shared registry file. Never carries a browser handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub screenshot_path: Option<String>,
    pub status: VerificationStatus,
    #[serde(default)]
    pub code: Option<String>,
}

impl VerificationRecord {
    pub fn pending(screenshot_path: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            screenshot_path,
            status: VerificationStatus::Pending,
            code: None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// Admin listing entry: `{timestamp, screenshot, status}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingView {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub screenshot: Option<String>,
    pub status: VerificationStatus,
}

impl From<&VerificationRecord> for PendingView {
    fn from(record: &VerificationRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            screenshot: record.screenshot_path.clone(),
            status: record.status,
        }
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339())
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {}", raw)))
}

/// RFC 3339, or a naive ISO-8601 local time as older writers produced.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => Some(local.with_timezone(&Utc)),
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_format() {
        let record = VerificationRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            screenshot_path: Some("static/screenshots/verification_20250301_120000.png".into()),
            status: VerificationStatus::Pending,
            code: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["timestamp"], "2025-03-01T12:00:00+00:00");
        assert_eq!(value["status"], "pending");
        assert!(value["code"].is_null());
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_parse_naive_timestamp() {
        let ts = parse_timestamp("2025-03-01T12:00:00.123456").unwrap();
        let expected = Local
            .from_local_datetime(
                &NaiveDateTime::parse_from_str("2025-03-01T12:00:00.123456", "%Y-%m-%dT%H:%M:%S%.f")
                    .unwrap(),
            )
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(ts, expected);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_legacy_error_status_reads_as_failed() {
        let record: VerificationRecord = serde_json::from_str(
            r#"{"timestamp":"2025-03-01T12:00:00+00:00","screenshot_path":null,"status":"error","code":"1"}"#,
        )
        .unwrap();
        assert_eq!(record.status, VerificationStatus::Failed);
        assert!(record.status.accepts_code());
    }
}
