use std::collections::HashMap;
use std::time::Duration;

use ::redis::{AsyncCommands, Client, Script};
use anyhow::Result;
use api::{Camera, CapturerRecord};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::Roster;

const CAMERAS_KEY: &str = "clipwatch:cameras";
const CAPTURERS_KEY: &str = "clipwatch:capturers";
const CAPTURER_KEY: &str = "clipwatch:capturer";
const OWNER_KEY: &str = "clipwatch:owner";

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const REFRESH_SCRIPT: &str = r#"
local owner = redis.call('GET', KEYS[1])
if owner == false or owner == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
    return 1
end
return 0
"#;

/// Roster shared through Redis. Ownership is a key per camera written with
/// `SET NX EX`, so the first claimant wins and a dead owner's lease expires.
#[derive(Clone)]
pub struct RedisRoster {
    client: Client,
    lease_secs: u64,
}

impl RedisRoster {
    pub async fn new(addr: &str, lease: Duration) -> Result<Self> {
        let roster = RedisRoster {
            client: Client::open(addr)?,
            lease_secs: lease.as_secs().max(1),
        };
        // check conn
        let mut conn = roster.client.get_multiplexed_async_connection().await?;
        let _ = conn.exists::<&str, bool>(CAMERAS_KEY).await?;
        Ok(roster)
    }

    fn owner_key(camera: &str) -> String {
        format!("{}:{}", OWNER_KEY, camera)
    }

    fn capturer_key(capturer: &str) -> String {
        format!("{}:{}", CAPTURER_KEY, capturer)
    }
}

#[async_trait]
impl Roster for RedisRoster {
    async fn register_camera(&self, camera: &Camera) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.hset_nx::<_, _, _, ()>(CAMERAS_KEY, &camera.name, serde_json::to_string(camera)?)
            .await?;
        Ok(())
    }

    async fn cameras(&self) -> Result<Vec<Camera>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: HashMap<String, String> = conn.hgetall(CAMERAS_KEY).await?;
        let mut heartbeats = HashMap::new();
        let mut cameras = Vec::with_capacity(raw.len());
        for (name, value) in raw {
            let mut camera: Camera = match serde_json::from_str(&value) {
                Ok(camera) => camera,
                Err(e) => {
                    debug!(camera = %name, "[roster] skip malformed camera: {}", e);
                    continue;
                }
            };
            camera.capturer = conn.get(Self::owner_key(&name)).await?;
            if let Some(owner) = &camera.capturer {
                if !heartbeats.contains_key(owner) {
                    let record: Option<String> = conn.get(Self::capturer_key(owner)).await?;
                    let heartbeat = record
                        .and_then(|r| serde_json::from_str::<CapturerRecord>(&r).ok())
                        .map(|r| r.heartbeat);
                    heartbeats.insert(owner.clone(), heartbeat);
                }
                camera.last_heartbeat = heartbeats.get(owner).copied().flatten();
            }
            cameras.push(camera);
        }
        cameras.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cameras)
    }

    async fn capturers(&self) -> Result<Vec<CapturerRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let names: Vec<String> = conn.smembers(CAPTURERS_KEY).await?;
        let mut records = Vec::with_capacity(names.len());
        let mut expired = Vec::new();
        for name in names {
            let raw: Option<String> = conn.get(Self::capturer_key(&name)).await?;
            match raw.and_then(|r| serde_json::from_str::<CapturerRecord>(&r).ok()) {
                Some(record) => records.push(record),
                None => expired.push(name),
            }
        }
        if !expired.is_empty() {
            let _ = conn.srem::<&str, Vec<String>, i64>(CAPTURERS_KEY, expired).await;
        }
        Ok(records)
    }

    async fn claim(&self, camera: &str, capturer: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::owner_key(camera);
        let set: Option<String> = ::redis::cmd("SET")
            .arg(&key)
            .arg(capturer)
            .arg("NX")
            .arg("EX")
            .arg(self.lease_secs)
            .query_async(&mut conn)
            .await?;
        if set.is_some() {
            return Ok(true);
        }
        let owner: Option<String> = conn.get(&key).await?;
        Ok(owner.as_deref() == Some(capturer))
    }

    async fn release(&self, camera: &str, capturer: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Script::new(RELEASE_SCRIPT)
            .key(Self::owner_key(camera))
            .arg(capturer)
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, record: &CapturerRecord, owned: &[String]) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.sadd::<_, _, ()>(CAPTURERS_KEY, &record.name).await?;
        conn.set_ex::<_, _, ()>(
            Self::capturer_key(&record.name),
            serde_json::to_string(record)?,
            self.lease_secs,
        )
        .await?;

        let refresh = Script::new(REFRESH_SCRIPT);
        for camera in owned {
            let kept: i64 = refresh
                .key(Self::owner_key(camera))
                .arg(&record.name)
                .arg(self.lease_secs)
                .invoke_async(&mut conn)
                .await?;
            if kept == 0 {
                warn!(camera = %camera, capturer = %record.name, "[roster] ownership lost");
            }
        }
        Ok(())
    }

    async fn update_dimensions(&self, camera: &str, width: u32, height: u32) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.hget(CAMERAS_KEY, camera).await?;
        let Some(raw) = raw else {
            return Ok(());
        };
        let mut entry: Camera = serde_json::from_str(&raw)?;
        entry.capture_width = width;
        entry.capture_height = height;
        conn.hset::<_, _, _, ()>(CAMERAS_KEY, camera, serde_json::to_string(&entry)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    fn unique(prefix: &str) -> String {
        format!("{}-{}", prefix, rand::random::<u32>())
    }

    fn record(name: &str) -> CapturerRecord {
        CapturerRecord {
            name: name.to_string(),
            capacity: 2,
            heartbeat: chrono::Utc::now(),
            agents: 1,
        }
    }

    async fn cleanup(roster: &RedisRoster, camera: &str, capturers: &[&str]) {
        let mut conn = roster.client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.hdel(CAMERAS_KEY, camera).await.unwrap();
        let _: () = conn.del(RedisRoster::owner_key(camera)).await.unwrap();
        for name in capturers {
            let _: () = conn.srem(CAPTURERS_KEY, *name).await.unwrap();
            let _: () = conn.del(RedisRoster::capturer_key(name)).await.unwrap();
        }
    }

    async fn owner(roster: &RedisRoster, camera: &str) -> Option<String> {
        roster
            .cameras()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.name == camera)
            .and_then(|c| c.capturer)
    }

    #[tokio::test]
    #[ignore = "needs a redis server, set REDIS_URL"]
    async fn test_claim_first_writer_wins_and_release_is_conditional() {
        let roster = RedisRoster::new(&redis_url(), Duration::from_secs(30))
            .await
            .unwrap();
        let camera = unique("cam");
        let (a, b) = (unique("a"), unique("b"));
        roster
            .register_camera(&Camera {
                name: camera.clone(),
                url: "file:///tmp/cam.h264".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(roster.claim(&camera, &a).await.unwrap());
        assert!(!roster.claim(&camera, &b).await.unwrap());
        assert!(roster.claim(&camera, &a).await.unwrap());

        roster.release(&camera, &b).await.unwrap();
        assert_eq!(owner(&roster, &camera).await, Some(a.clone()));

        roster.release(&camera, &a).await.unwrap();
        assert_eq!(owner(&roster, &camera).await, None);
        assert!(roster.claim(&camera, &b).await.unwrap());

        cleanup(&roster, &camera, &[&a, &b]).await;
    }

    #[tokio::test]
    #[ignore = "needs a redis server, set REDIS_URL"]
    async fn test_heartbeat_refreshes_only_own_leases() {
        let roster = RedisRoster::new(&redis_url(), Duration::from_secs(1))
            .await
            .unwrap();
        let camera = unique("cam");
        let (a, b) = (unique("a"), unique("b"));
        roster
            .register_camera(&Camera {
                name: camera.clone(),
                url: "file:///tmp/cam.h264".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(roster.claim(&camera, &a).await.unwrap());

        // b cannot take over by refreshing a lease it does not hold
        roster.heartbeat(&record(&b), &[camera.clone()]).await.unwrap();
        assert_eq!(owner(&roster, &camera).await, Some(a.clone()));

        // a keeps its lease alive past the original expiry
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(600)).await;
            roster.heartbeat(&record(&a), &[camera.clone()]).await.unwrap();
        }
        assert!(!roster.claim(&camera, &b).await.unwrap());
        let names: Vec<String> = roster
            .capturers()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert!(names.contains(&a));

        // a goes silent and the lease runs out
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(roster.claim(&camera, &b).await.unwrap());
        assert!(!roster
            .capturers()
            .await
            .unwrap()
            .iter()
            .any(|r| r.name == a));

        cleanup(&roster, &camera, &[&a, &b]).await;
    }
}
