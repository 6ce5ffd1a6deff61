//! Fixed topic names of the clip pipeline.
//!
//! Recordings: capturer -> model invokers
//! Metadata:   model invokers -> media indexers
//! Alerts:     model invokers -> alert notifiers

pub const RECORDINGS: &str = "recordings";
pub const METADATA: &str = "metadata";
pub const ALERTS: &str = "alerts";

/// Default pub/sub namespace every topic lives under.
pub const PUBSUB: &str = "clipwatch";

pub const ALL: [&str; 3] = [RECORDINGS, METADATA, ALERTS];
