use tracing::{debug, error};

pub async fn shutdown_signal() {
    let signal = signal::wait_for_stop_signal().await;
    debug!("Received signal: {}", signal);
}

/// Read `path`, else `{name}.toml`, else `/etc/clipwatch/{name}.toml`.
/// A missing or malformed file yields the defaults.
pub fn load<T>(name: &str, path: Option<String>) -> T
where
    T: serde::de::DeserializeOwned + std::default::Default,
{
    use std::fs::read_to_string;
    let result = read_to_string(path.unwrap_or(format!("{name}.toml")))
        .or(read_to_string(format!("/etc/clipwatch/{name}.toml")))
        .unwrap_or_default();
    match toml::from_str(result.as_str()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("config load error: {}", err);
            Default::default()
        }
    }
}
