//! Filesystem-backed blob socket.
//!
//! Blobs live in numerically named files under a root directory; object
//! metadata lives in an in-memory map that `backup` serializes to a
//! sidecar JSON file. The file-name counter resumes at
//! `max(existing names)` on init, so the next blob lands in `max + 1`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{BackendSocket, ObjectClaim, ObjectMetadata, ReadyCell, now_millis, with_deadline};
use crate::config::FsSocketConfig;
use crate::promise::{Promise, Step};
use crate::{GatewayError, GatewayResult};

/// One sidecar record; `file` is the numeric blob file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SidecarEntry {
    id: String,
    size: i64,
    created_at: i64,
    file: u64,
}

#[derive(Default)]
struct FsState {
    entries: HashMap<String, SidecarEntry>,
    counter: u64,
    open: bool,
}

struct FsInner {
    config: FsSocketConfig,
    ready: ReadyCell,
    state: Mutex<FsState>,
}

impl FsInner {
    fn blob_path(&self, file: u64) -> PathBuf {
        Path::new(&self.config.root).join(file.to_string())
    }

    async fn flush_sidecar(&self, state: &FsState) -> GatewayResult<()> {
        let json = serde_json::to_string_pretty(&state.entries)
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
        tokio::fs::write(&self.config.meta_table, json).await?;
        Ok(())
    }
}

/// Blob socket over a local directory tree.
#[derive(Clone)]
pub struct FsSocket {
    inner: Arc<FsInner>,
}

impl FsSocket {
    pub fn new(config: FsSocketConfig) -> Self {
        Self {
            inner: Arc::new(FsInner {
                config,
                ready: ReadyCell::new(),
                state: Mutex::new(FsState::default()),
            }),
        }
    }
}

impl BackendSocket for FsSocket {
    fn init(&self) -> Promise<bool> {
        let ready = self.inner.ready.fresh();
        let inner = self.inner.clone();
        ready.adopt(Promise::spawn(async move {
            tokio::fs::create_dir_all(&inner.config.root).await?;

            // Malformed or missing sidecar contents load as empty.
            let entries = match tokio::fs::read(&inner.config.meta_table).await {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
                Err(_) => HashMap::new(),
            };

            let mut max_name = 0u64;
            let mut dir = tokio::fs::read_dir(&inner.config.root).await?;
            while let Some(entry) = dir.next_entry().await? {
                if let Some(name) = entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<u64>().ok())
                {
                    max_name = max_name.max(name);
                }
            }

            let mut state = inner.state.lock().await;
            state.entries = entries;
            state.counter = max_name;
            state.open = true;
            Ok(true)
        }));
        ready
    }

    fn is_ready(&self) -> Promise<bool> {
        self.inner.ready.current()
    }

    fn backup(&self) -> Promise<()> {
        let inner = self.inner.clone();
        Promise::spawn(async move {
            let state = inner.state.lock().await;
            if !state.open {
                return Err(GatewayError::Closed);
            }
            inner.flush_sidecar(&state).await
        })
    }

    fn close(&self) -> Promise<()> {
        self.inner.ready.reject(GatewayError::Closed);
        let inner = self.inner.clone();
        Promise::spawn(async move {
            inner.state.lock().await.open = false;
            Ok(())
        })
    }

    fn is_online(&self) -> Promise<Option<u64>> {
        let inner = self.inner.clone();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let started = Instant::now();
                match tokio::fs::metadata(&inner.config.root).await {
                    Ok(meta) if meta.is_dir() => Ok(Some(started.elapsed().as_millis() as u64)),
                    _ => Ok(None),
                }
            }),
            budget,
        )
        .catch(|_| Ok(Step::Value(None)))
    }

    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata> {
        let inner = self.inner.clone();
        let id = id.to_string();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let state = inner.state.lock().await;
                if !state.open {
                    return Err(GatewayError::Closed);
                }
                let entry = state
                    .entries
                    .get(&id)
                    .ok_or(GatewayError::NotFound(id))?;
                Ok(ObjectMetadata {
                    id: entry.id.clone(),
                    size: entry.size,
                    created_at: entry.created_at,
                })
            }),
            budget,
        )
    }

    fn approve_object_metadata(&self, claim: ObjectClaim) -> Promise<bool> {
        let inner = self.inner.clone();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let state = inner.state.lock().await;
                if !state.open {
                    return Err(GatewayError::Closed);
                }
                if state.entries.contains_key(&claim.id) {
                    return Err(GatewayError::AlreadyExists(claim.id));
                }
                Ok(true)
            }),
            budget,
        )
    }

    fn get_object(&self, id: &str) -> Promise<Vec<u8>> {
        let inner = self.inner.clone();
        let id = id.to_string();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let file = {
                    let state = inner.state.lock().await;
                    if !state.open {
                        return Err(GatewayError::Closed);
                    }
                    state
                        .entries
                        .get(&id)
                        .ok_or(GatewayError::NotFound(id))?
                        .file
                };
                Ok(tokio::fs::read(inner.blob_path(file)).await?)
            }),
            budget,
        )
    }

    fn set_object(&self, id: &str, data: Vec<u8>) -> Promise<ObjectMetadata> {
        let inner = self.inner.clone();
        let id = id.to_string();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                // The lock spans check, file write and map update so the
                // id cannot be claimed twice.
                let mut state = inner.state.lock().await;
                if !state.open {
                    return Err(GatewayError::Closed);
                }
                if state.entries.contains_key(&id) {
                    return Err(GatewayError::AlreadyExists(id));
                }

                let file = state.counter + 1;
                tokio::fs::write(inner.blob_path(file), &data).await?;
                state.counter = file;

                let entry = SidecarEntry {
                    id: id.clone(),
                    size: data.len() as i64,
                    created_at: now_millis(),
                    file,
                };
                let metadata = ObjectMetadata {
                    id: entry.id.clone(),
                    size: entry.size,
                    created_at: entry.created_at,
                };
                state.entries.insert(id, entry);
                Ok(metadata)
            }),
            budget,
        )
    }

    fn del_object(&self, id: &str) -> Promise<bool> {
        let inner = self.inner.clone();
        let id = id.to_string();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let mut state = inner.state.lock().await;
                if !state.open {
                    return Err(GatewayError::Closed);
                }
                match state.entries.remove(&id) {
                    Some(entry) => {
                        let _ = tokio::fs::remove_file(inner.blob_path(entry.file)).await;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }),
            budget,
        )
    }
}
