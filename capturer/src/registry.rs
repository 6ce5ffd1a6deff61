use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use api::Command;
use tokio::sync::mpsc::Sender;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Running agent for one camera.
pub struct AgentHandle {
    pub commands: Sender<Command>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// Agents owned by this capturer, keyed by camera name.
#[derive(Clone, Default)]
pub struct Registry {
    agents: Arc<RwLock<HashMap<String, AgentHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Track a new agent. An agent already running for `camera` is kept and
    /// the new one cancelled.
    pub async fn insert(&self, camera: &str, handle: AgentHandle) -> bool {
        let mut agents = self.agents.write().await;
        if agents.contains_key(camera) {
            handle.cancel.cancel();
            return false;
        }
        agents.insert(camera.to_string(), handle);
        true
    }

    /// Deliver a command to the camera's agent.
    pub async fn send(&self, camera: &str, command: Command) -> Result<()> {
        let commands = self
            .agents
            .read()
            .await
            .get(camera)
            .map(|h| h.commands.clone())
            .ok_or_else(|| anyhow!("no agent for camera {}", camera))?;
        commands
            .send(command)
            .await
            .map_err(|_| anyhow!("agent for camera {} has exited", camera))
    }

    /// Drop agents whose task finished and return their cameras.
    pub async fn reap(&self) -> Vec<String> {
        let mut agents = self.agents.write().await;
        let finished: Vec<String> = agents
            .iter()
            .filter(|(_, h)| h.task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &finished {
            agents.remove(name);
            debug!(camera = %name, "[registry] agent exited");
        }
        finished
    }

    /// Cancel every agent and wait for them, at most `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let handles: Vec<(String, AgentHandle)> = self.agents.write().await.drain().collect();
        info!("[registry] stopping {} agents", handles.len());
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        signal::drain(grace, async move {
            for (camera, handle) in handles {
                if let Err(e) = handle.task.await {
                    debug!(camera = %camera, "[registry] agent task failed: {}", e);
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn spawn_agent() -> (AgentHandle, mpsc::Receiver<Command>) {
        let (commands, rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        (
            AgentHandle {
                commands,
                cancel,
                task,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_insert_send_and_reap() {
        let registry = Registry::new();
        let (handle, mut rx) = spawn_agent();
        let cancel = handle.cancel.clone();
        assert!(registry.insert("cam-1", handle).await);

        let (dup, _) = spawn_agent();
        let dup_cancel = dup.cancel.clone();
        assert!(!registry.insert("cam-1", dup).await);
        assert!(dup_cancel.is_cancelled());

        registry.send("cam-1", Command::Pause).await.unwrap();
        assert_eq!(rx.recv().await, Some(Command::Pause));
        assert!(registry.send("cam-2", Command::Pause).await.is_err());

        assert!(registry.reap().await.is_empty());
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.reap().await, vec!["cam-1".to_string()]);
        assert_eq!(registry.active().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let registry = Registry::new();
        for name in ["cam-1", "cam-2"] {
            let (handle, _) = spawn_agent();
            registry.insert(name, handle).await;
        }
        assert_eq!(registry.names().await, vec!["cam-1", "cam-2"]);
        assert!(registry.shutdown(Duration::from_secs(1)).await);
        assert_eq!(registry.active().await, 0);
    }
}
