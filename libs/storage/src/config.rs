use serde::{Deserialize, Serialize};

/// Where uploaded clips and key/value records live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local directory
    Fs {
        #[serde(default = "default_fs_root")]
        root: String,
    },
    /// S3 or any S3-compatible service
    S3 {
        bucket: String,
        #[serde(default = "default_bucket_root")]
        root: String,
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint for S3-compatible services
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        enable_virtual_host_style: bool,
    },
    /// Alibaba Cloud OSS, spoken to through its S3 dialect
    Oss {
        bucket: String,
        #[serde(default = "default_bucket_root")]
        root: String,
        region: String,
        endpoint: String,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        access_key_secret: Option<String>,
    },
}

impl StorageConfig {
    /// Provider tag stamped on clips uploaded to this backend.
    pub fn provider(&self) -> &'static str {
        match self {
            StorageConfig::Fs { .. } => "fs",
            StorageConfig::S3 { .. } => "s3",
            StorageConfig::Oss { .. } => "oss",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Fs {
            root: default_fs_root(),
        }
    }
}

fn default_fs_root() -> String {
    "./storage".to_string()
}

fn default_bucket_root() -> String {
    "/clips".to_string()
}
