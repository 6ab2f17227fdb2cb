//! Same-device transport
//!
//! Surfaces in one process share a [`LocalBus`]; surfaces in other processes
//! on the same machine see the persisted snapshot file change. Late joiners
//! start from whatever snapshot was persisted last.

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{decode_message, Inbound, SyncMessage, Transport};
use crate::session::SessionState;

pub const LOCAL_TRANSPORT: &str = "local";

#[derive(Debug, Clone)]
struct BusFrame {
    from: Uuid,
    payload: Arc<str>,
}

/// In-process publish medium shared by every surface on this device
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<BusFrame>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One surface's endpoint on the same-device transport
pub struct LocalTransport {
    id: Uuid,
    bus: LocalBus,
    snapshot_path: PathBuf,
    _watcher: Mutex<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalTransport {
    /// Join the bus and start watching the snapshot file.
    ///
    /// Messages from other surfaces and external writes to the snapshot file
    /// are forwarded to `inbound`.
    pub fn start(
        bus: &LocalBus,
        snapshot_path: impl Into<PathBuf>,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<Arc<Self>> {
        let id = Uuid::new_v4();
        let snapshot_path = snapshot_path.into();

        if let Some(parent) = snapshot_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create snapshot directory: {:?}", parent))?;
        }

        let bus_task = {
            let mut rx = bus.tx.subscribe();
            let inbound = inbound.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(frame) if frame.from == id => {}
                        Ok(frame) => {
                            if let Some(message) = decode_message(LOCAL_TRANSPORT, &frame.payload) {
                                let item = Inbound {
                                    origin: LOCAL_TRANSPORT.to_string(),
                                    message,
                                };
                                if inbound.send(item).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Local bus lagged, skipped {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                debug!("Local bus listener stopped");
            })
        };

        let (changed_tx, mut changed_rx) = mpsc::unbounded_channel::<()>();
        let watcher = Self::watch_file(&snapshot_path, changed_tx)?;

        let file_task = {
            let path = snapshot_path.clone();
            tokio::spawn(async move {
                while changed_rx.recv().await.is_some() {
                    let Some(snapshot) = load_snapshot(&path).await else {
                        continue;
                    };
                    let item = Inbound {
                        origin: LOCAL_TRANSPORT.to_string(),
                        message: SyncMessage::State(snapshot),
                    };
                    if inbound.send(item).await.is_err() {
                        break;
                    }
                }
                debug!("Snapshot file listener stopped");
            })
        };

        info!("Local transport {} using {:?}", id, snapshot_path);

        Ok(Arc::new(Self {
            id,
            bus: bus.clone(),
            snapshot_path,
            _watcher: Mutex::new(watcher),
            tasks: vec![bus_task, file_task],
        }))
    }

    /// Watch the snapshot's directory, since writes replace the file by rename
    fn watch_file(path: &Path, changed: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
        let file_name = path.file_name().map(|n| n.to_os_string());
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            let touches_snapshot = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if touches_snapshot && (event.kind.is_create() || event.kind.is_modify()) {
                let _ = changed.send(());
            }
        })
        .context("Failed to create snapshot watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;

        Ok(watcher)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Write the snapshot as a full replacement of the previous file
    async fn persist(&self, json: &str) -> Result<()> {
        let tmp = self.snapshot_path.with_extension(format!("{}.tmp", self.id.simple()));
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.snapshot_path)
            .await
            .with_context(|| format!("Failed to replace {:?}", self.snapshot_path))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &str {
        LOCAL_TRANSPORT
    }

    async fn publish(&self, snapshot: &SessionState) -> Result<()> {
        let payload = serde_json::to_string(&SyncMessage::State(snapshot.clone()))?;

        let snapshot_json = serde_json::to_string(snapshot)?;
        self.persist(&snapshot_json).await?;

        // No receivers just means no other surface is open
        let _ = self.bus.tx.send(BusFrame {
            from: self.id,
            payload: payload.into(),
        });

        debug!("Published version {} locally", snapshot.version);
        Ok(())
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Read the last persisted snapshot, if there is a readable one
pub async fn load_snapshot(path: &Path) -> Option<SessionState> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read snapshot {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("Ignoring unreadable snapshot {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_snapshot_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        assert!(load_snapshot(&path).await.is_none());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_snapshot(&path).await.is_none());

        let mut state = SessionState::default();
        state.version = 12;
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(load_snapshot(&path).await.map(|s| s.version), Some(12));
    }
}
