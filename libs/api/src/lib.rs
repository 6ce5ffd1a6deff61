pub mod camera;
pub mod clip;
pub mod command;
pub mod topic;

pub use camera::{Camera, CapturerRecord};
pub use clip::Clip;
pub use command::Command;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Layout of every timestamp string carried on the wire.
pub const LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_time(t: DateTime<Utc>) -> String {
    t.format(LAYOUT).to_string()
}

pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, LAYOUT)
        .ok()
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_layout() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 3).unwrap();
        let s = format_time(t);
        assert_eq!(s, "2024-01-15 12:00:03.000");
        assert_eq!(parse_time(&s), Some(t));
        assert_eq!(parse_time(""), None);
    }
}
