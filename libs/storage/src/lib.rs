pub mod clip;
pub mod config;
pub mod operator;
pub mod path;

#[cfg(test)]
mod tests;

pub use clip::{ClipStore, OpendalClipStore};
pub use config::StorageConfig;
pub use operator::init_operator;
pub use path::{clip_path, kv_path, validate_path};
