use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use api::{format_time, Clip};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::Handler;

pub const INDEXERS: &[&str] = &["database", "elastic"];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clips (
    id TEXT NOT NULL,
    model_invoker TEXT NOT NULL,
    camera TEXT NOT NULL,
    capturer TEXT NOT NULL,
    region TEXT NOT NULL,
    location TEXT NOT NULL,
    priority INTEGER NOT NULL,
    cloud_reference TEXT NOT NULL,
    storage_provider TEXT NOT NULL,
    frames INTEGER NOT NULL,
    begin_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    tags TEXT NOT NULL,
    tags_count INTEGER NOT NULL,
    alerts_count INTEGER NOT NULL,
    clip_type INTEGER NOT NULL,
    model_invocation_begin_time TEXT NOT NULL,
    model_invocation_end_time TEXT NOT NULL,
    media_indexer_begin_time TEXT NOT NULL,
    media_indexer_end_time TEXT NOT NULL,
    PRIMARY KEY (id, model_invoker)
)
"#;

/// Why an insert did not land.
#[derive(Debug)]
enum InsertError {
    /// Row already indexed, a redelivered message
    Ignore,
    Other(sqlx::Error),
}

impl From<sqlx::Error> for InsertError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => InsertError::Ignore,
            _ => InsertError::Other(err),
        }
    }
}

fn stamp_begin(clip: &mut Clip) {
    clip.media_indexer_begin_time = format_time(Utc::now());
}

fn stamp_end(clip: &mut Clip) {
    clip.media_indexer_end_time = format_time(Utc::now());
}

/// Indexes clip metadata into a SQL table, one row per clip and model.
pub struct DatabaseIndexer {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl DatabaseIndexer {
    /// The pool connects on first use, so a stage starts even while the
    /// database is unreachable.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(options);
        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(SCHEMA).execute(&self.pool).await?;
                debug!("[indexer] clips table ready");
                Ok::<(), sqlx::Error>(())
            })
            .await?;
        Ok(())
    }

    async fn insert(&self, clip: &Clip) -> std::result::Result<(), InsertError> {
        let tags = serde_json::to_string(&clip.tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"INSERT INTO clips (id, model_invoker, camera, capturer, region, location, priority,
             cloud_reference, storage_provider, frames, begin_time, end_time, tags, tags_count,
             alerts_count, clip_type, model_invocation_begin_time, model_invocation_end_time,
             media_indexer_begin_time, media_indexer_end_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&clip.id)
        .bind(&clip.model_invoker)
        .bind(&clip.camera)
        .bind(&clip.capturer)
        .bind(&clip.region)
        .bind(&clip.location)
        .bind(clip.priority)
        .bind(&clip.cloud_reference)
        .bind(&clip.storage_provider)
        .bind(clip.frames)
        .bind(&clip.begin_time)
        .bind(&clip.end_time)
        .bind(tags)
        .bind(clip.tags_count)
        .bind(clip.alerts_count)
        .bind(clip.clip_type)
        .bind(&clip.model_invocation_begin_time)
        .bind(&clip.model_invocation_end_time)
        .bind(&clip.media_indexer_begin_time)
        .bind(&clip.media_indexer_end_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Models that indexed the clip, with their tag counts.
    pub async fn find(&self, id: &str) -> Result<Vec<(String, i64)>> {
        self.ensure_schema().await?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT model_invoker, tags_count FROM clips WHERE id = ? ORDER BY model_invoker",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Handler for DatabaseIndexer {
    async fn handle(&self, mut clip: Clip) -> Result<()> {
        self.ensure_schema().await?;
        stamp_begin(&mut clip);
        stamp_end(&mut clip);
        match self.insert(&clip).await {
            Ok(()) => {
                info!(clip = %clip.id, model = %clip.model_invoker, "[indexer] clip indexed");
                Ok(())
            }
            Err(InsertError::Ignore) => {
                debug!(clip = %clip.id, model = %clip.model_invoker, "[indexer] already indexed");
                Ok(())
            }
            Err(InsertError::Other(e)) => Err(e.into()),
        }
    }
}

/// Indexes clip metadata as Elasticsearch documents.
pub struct ElasticIndexer {
    url: String,
    index: String,
    client: Client,
}

impl ElasticIndexer {
    pub fn new(url: &str, index: &str) -> Result<Self> {
        if index.is_empty() {
            return Err(anyhow!("elastic index cannot be empty"));
        }
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            client: Client::builder()
                .connect_timeout(Duration::from_millis(300))
                .timeout(Duration::from_secs(5))
                .build()?,
        })
    }

    /// Document address; a redelivered clip overwrites its own document.
    pub fn document_url(&self, clip: &Clip) -> String {
        if clip.model_invoker.is_empty() {
            format!("{}/{}/_doc/{}", self.url, self.index, clip.id)
        } else {
            format!(
                "{}/{}/_doc/{}-{}",
                self.url, self.index, clip.id, clip.model_invoker
            )
        }
    }
}

#[async_trait]
impl Handler for ElasticIndexer {
    async fn handle(&self, mut clip: Clip) -> Result<()> {
        stamp_begin(&mut clip);
        stamp_end(&mut clip);
        let url = self.document_url(&clip);
        let response = self.client.put(&url).json(&clip).send().await?;
        let status = response.status();
        if status.is_success() {
            info!(clip = %clip.id, url, "[indexer] document indexed");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(clip = %clip.id, url, ?status, body, "[indexer] elastic rejected document");
            Err(anyhow!("elastic returned {}", status))
        }
    }
}
