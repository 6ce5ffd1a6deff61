use anyhow::Result;
use opendal::services;
use opendal::Operator;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

pub(crate) fn create_operator(config: &StorageConfig) -> Result<Operator> {
    debug!("creating storage operator: {:?}", config.provider());

    let op = match config {
        StorageConfig::Fs { root } => {
            info!("filesystem storage at {}", root);
            Operator::new(services::Fs::default().root(root))?.finish()
        }
        StorageConfig::S3 {
            bucket,
            root,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            enable_virtual_host_style,
        } => {
            info!("s3 storage bucket {} region {:?}", bucket, region);
            let mut builder = services::S3::default()
                .bucket(bucket)
                .root(root.trim_start_matches('/'));
            if let Some(region) = region {
                builder = builder.region(region);
            }
            if let Some(endpoint) = endpoint {
                builder = builder.endpoint(endpoint);
            }
            if let Some(key) = access_key_id {
                builder = builder.access_key_id(key);
            }
            if let Some(secret) = secret_access_key {
                builder = builder.secret_access_key(secret);
            }
            if *enable_virtual_host_style {
                builder = builder.enable_virtual_host_style();
            }
            Operator::new(builder)?.finish()
        }
        StorageConfig::Oss {
            bucket,
            root,
            region,
            endpoint,
            access_key_id,
            access_key_secret,
        } => {
            info!("oss storage bucket {} region {}", bucket, region);
            let mut builder = services::S3::default()
                .bucket(bucket)
                .root(root.trim_start_matches('/'))
                .region(region)
                .endpoint(endpoint)
                .enable_virtual_host_style();
            if let Some(key) = access_key_id {
                builder = builder.access_key_id(key);
            }
            if let Some(secret) = access_key_secret {
                builder = builder.secret_access_key(secret);
            }
            Operator::new(builder)?.finish()
        }
    };
    Ok(op)
}

async fn test_connection(operator: &Operator) -> Result<()> {
    operator.check().await?;
    Ok(())
}

/// Create the operator and probe it. A failed probe is only a warning, uploads
/// are best-effort and the backend may come up later.
pub async fn init_operator(config: &StorageConfig) -> Result<Operator> {
    let operator = create_operator(config)?;
    match test_connection(&operator).await {
        Ok(_) => info!("storage backend {} verified", config.provider()),
        Err(e) => warn!(
            "storage backend {} probe failed: {}, continuing anyway",
            config.provider(),
            e
        ),
    }
    Ok(operator)
}
