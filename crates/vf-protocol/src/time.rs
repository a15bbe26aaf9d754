//! Source timestamp handling.
//!
//! Devices report either epoch seconds (already UTC) or wall-clock
//! strings in the deployment time zone (Asia/Bangkok).  This is the
//! only place a named zone is applied; everything downstream is UTC.

use crate::decode::DecodeError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Bangkok;
use serde::{Deserialize, Serialize};

/// Wall-clock format used by watch payloads, e.g. `13/07/2025 08:50:59`.
const LOCAL_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Interpret epoch seconds as UTC.
pub fn from_epoch_seconds(secs: i64) -> Result<DateTime<Utc>, DecodeError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| DecodeError::Time(format!("epoch seconds out of range: {secs}")))
}

/// Parse a `dd/mm/yyyy HH:MM:SS` string as Asia/Bangkok local time and
/// convert to UTC.
pub fn parse_device_local(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), LOCAL_FORMAT)
        .map_err(|e| DecodeError::Time(format!("`{s}`: {e}")))?;
    // Bangkok has no DST; a local timestamp maps to exactly one instant.
    let local = Bangkok
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| DecodeError::Time(format!("`{s}` is not a valid Bangkok local time")))?;
    Ok(local.with_timezone(&Utc))
}

/// A time field that arrives either as epoch seconds or as a local
/// wall-clock string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeField {
    Epoch(i64),
    Local(String),
}

impl TimeField {
    pub fn to_utc(&self) -> Result<DateTime<Utc>, DecodeError> {
        match self {
            TimeField::Epoch(secs) => from_epoch_seconds(*secs),
            TimeField::Local(s) => parse_device_local(s),
        }
    }

    pub fn from_utc(ts: DateTime<Utc>) -> TimeField {
        TimeField::Epoch(ts.timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_are_utc() {
        let ts = from_epoch_seconds(1_836_942_771).unwrap();
        assert_eq!(ts.to_rfc3339(), "2028-03-14T06:32:51+00:00");
    }

    #[test]
    fn local_strings_shift_back_seven_hours() {
        // 08:50:59 Bangkok == 01:50:59 UTC.
        let ts = parse_device_local("13/07/2025 08:50:59").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-07-13T01:50:59+00:00");
    }

    #[test]
    fn malformed_local_strings_are_rejected() {
        assert!(parse_device_local("2025-07-13T08:50:59").is_err());
        assert!(parse_device_local("32/13/2025 99:99:99").is_err());
    }

    #[test]
    fn time_field_accepts_both_forms() {
        let epoch: TimeField = serde_json::from_str("1836942771").unwrap();
        assert_eq!(epoch, TimeField::Epoch(1_836_942_771));
        let local: TimeField = serde_json::from_str("\"13/07/2025 08:50:59\"").unwrap();
        assert_eq!(local, TimeField::Local("13/07/2025 08:50:59".to_owned()));
        assert_eq!(
            epoch.to_utc().unwrap().to_rfc3339(),
            "2028-03-14T06:32:51+00:00"
        );
    }
}
