use serde::{Deserialize, Serialize};

const MILLIS_PER_SECOND: u64 = 1000;
const SECONDS_PER_MINUTE: u64 = 60;

/// Wall-clock time, held in milliseconds since the Unix epoch.
///
/// Minute and second views are exact integer conversions of the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Timestamp(seconds * MILLIS_PER_SECOND)
    }

    pub fn from_minutes(minutes: u64) -> Self {
        Timestamp(minutes * SECONDS_PER_MINUTE * MILLIS_PER_SECOND)
    }

    pub fn millis(&self) -> u64 {
        self.0
    }

    pub fn seconds(&self) -> u64 {
        self.0 / MILLIS_PER_SECOND
    }

    pub fn minutes(&self) -> u64 {
        self.seconds() / SECONDS_PER_MINUTE
    }

    /// Truncates to whole minutes.
    pub fn to_minute_precision(self) -> Self {
        Timestamp::from_minutes(self.minutes())
    }

    /// Local date/time as `YYYY-MM-DD HH:MM:SS`.
    pub fn local_string(&self) -> String {
        use chrono::TimeZone;
        match chrono::Local.timestamp_opt(self.seconds() as i64, 0) {
            chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            chrono::LocalResult::Ambiguous(dt, _) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            chrono::LocalResult::None => String::new(),
        }
    }
}
