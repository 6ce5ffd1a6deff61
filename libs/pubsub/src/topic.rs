//! TOPIC: <namespace>/<topic>
//!
//! Example: clipwatch/recordings
//!
//! Shared subscription: $share/<group>/<namespace>/<topic>

const SPLIT: char = '/';
const SHARE: &str = "$share";

pub fn build(namespace: &str, topic: &str) -> String {
    format!("{}{}{}", namespace, SPLIT, topic)
}

pub fn build_sub(namespace: &str, topic: &str, group: Option<&str>) -> String {
    match group {
        Some(group) => format!("{SHARE}{SPLIT}{group}{SPLIT}{}", build(namespace, topic)),
        None => build(namespace, topic),
    }
}

/// Split a received topic into (namespace, topic).
pub fn parse(full: &str) -> Option<(&str, &str)> {
    let full = match full.strip_prefix(SHARE) {
        Some(rest) => rest.trim_start_matches(SPLIT).split_once(SPLIT)?.1,
        None => full,
    };
    full.rsplit_once(SPLIT)
}

#[test]
fn test_build_parse() {
    assert_eq!(build("clipwatch", "recordings"), "clipwatch/recordings");
    assert_eq!(
        build_sub("clipwatch", "alerts", Some("slack")),
        "$share/slack/clipwatch/alerts"
    );
    assert_eq!(build_sub("clipwatch", "alerts", None), "clipwatch/alerts");

    assert_eq!(parse("clipwatch/recordings"), Some(("clipwatch", "recordings")));
    assert_eq!(parse("site/a/metadata"), Some(("site/a", "metadata")));
    assert_eq!(
        parse("$share/slack/clipwatch/alerts"),
        Some(("clipwatch", "alerts"))
    );
    assert_eq!(parse("bare"), None);
}
