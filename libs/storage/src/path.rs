use chrono::{DateTime, Datelike, Utc};

/// Object path of an uploaded clip: `{camera}/{year}/{month}/{day}/{file}`
pub fn clip_path(camera: &str, begin: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{}/{:04}/{:02}/{:02}/{}",
        camera,
        begin.year_ce().1,
        begin.month(),
        begin.day(),
        file_name
    )
}

/// Object path of a key/value record: `{store}/{key}`
pub fn kv_path(store: &str, key: &str) -> String {
    format!("{}/{}", store.trim_matches('/'), key.replace(['/', '\\'], "_"))
}

pub fn validate_path(path: &str) -> bool {
    !path.is_empty() && !path.contains("..") && !path.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clip_path() {
        let begin = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            clip_path("cam-1", begin, "cam-1_1705320000.mp4"),
            "cam-1/2024/01/15/cam-1_1705320000.mp4"
        );
    }

    #[test]
    fn test_kv_path_flattens_key() {
        assert_eq!(kv_path("errors/", "cam-1:17/0"), "errors/cam-1:17_0");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("cam-1/2024/01/15/a.mp4"));
        assert!(!validate_path("../cam-1/a.mp4"));
        assert!(!validate_path("/absolute/a.mp4"));
        assert!(!validate_path(""));
    }
}
