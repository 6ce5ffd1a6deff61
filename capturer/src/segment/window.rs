use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Time-of-day range in UTC, `HH:MM-HH:MM`. A start after the end wraps midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl RecordingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let now = t.time().with_nanosecond(0).unwrap_or(t.time());
        if self.start <= self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

impl FromStr for RecordingWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("invalid recording window: {}", s))?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M")?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M")?;
        if start == end {
            anyhow::bail!("empty recording window: {}", s);
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for RecordingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl Serialize for RecordingWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordingWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_window_same_day() {
        let w: RecordingWindow = "08:00-18:30".parse().unwrap();
        assert!(w.contains(at(8, 0)));
        assert!(w.contains(at(12, 0)));
        assert!(!w.contains(at(18, 30)));
        assert!(!w.contains(at(3, 0)));
        assert_eq!(w.to_string(), "08:00-18:30");
    }

    #[test]
    fn test_window_wraps_midnight() {
        let w: RecordingWindow = "22:00-06:00".parse().unwrap();
        assert!(w.contains(at(23, 15)));
        assert!(w.contains(at(0, 0)));
        assert!(w.contains(at(5, 59)));
        assert!(!w.contains(at(6, 0)));
        assert!(!w.contains(at(12, 0)));
    }

    #[test]
    fn test_window_rejects_garbage() {
        assert!("22:00".parse::<RecordingWindow>().is_err());
        assert!("25:00-06:00".parse::<RecordingWindow>().is_err());
        assert!("06:00-06:00".parse::<RecordingWindow>().is_err());
    }
}
