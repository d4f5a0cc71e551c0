//! The stateless dispatcher: no record of where anything went.
//!
//! Reads fan out to every backend in parallel and take the first hit (in
//! socket order). Writes walk a shuffled socket order and commit to the
//! first backend that is online and approves the id.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::{Frontend, StoredObject, WritePayload, decode_payload};
use crate::backend::{BackendSocket, ObjectClaim, ReadyCell};
use crate::promise::{Promise, Step};
use crate::{GatewayError, GatewayResult};

/// Dispatcher over an ordered set of backend sockets.
pub struct StatelessFrontend {
    sockets: Vec<Arc<dyn BackendSocket>>,
    ready: ReadyCell,
    /// Sockets whose init failed; kept out of reads and writes.
    excluded: RwLock<HashSet<usize>>,
    closed: AtomicBool,
}

impl StatelessFrontend {
    pub fn new(sockets: Vec<Arc<dyn BackendSocket>>) -> Self {
        Self {
            sockets,
            ready: ReadyCell::new(),
            excluded: RwLock::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    fn ensure_open(&self) -> GatewayResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(GatewayError::Closed)
        } else {
            Ok(())
        }
    }

    fn is_excluded(&self, index: usize) -> bool {
        self.excluded
            .read()
            .expect("excluded set poisoned")
            .contains(&index)
    }

    /// A fresh random write order over all socket indices.
    pub(crate) fn shuffled_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.sockets.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }

    pub(crate) fn all_indices(&self) -> Vec<usize> {
        (0..self.sockets.len()).collect()
    }

    /// Resolve `id` across `sockets`, in parallel. Every per-backend
    /// failure is absorbed into "absent"; the first non-absent result in
    /// input order wins.
    pub(crate) async fn read_from(
        &self,
        id: &str,
        sockets: &[usize],
    ) -> GatewayResult<Option<StoredObject>> {
        self.ensure_open()?;

        let attempts: Vec<Promise<Option<StoredObject>>> = sockets
            .iter()
            .filter(|&&index| index < self.sockets.len() && !self.is_excluded(index))
            .map(|&index| {
                let socket = self.sockets[index].clone();
                let id = id.to_string();
                Promise::spawn(async move {
                    let metadata = socket.get_object_metadata(&id).wait().await?;
                    let data = socket.get_object(&id).wait().await?;
                    Ok(StoredObject { metadata, data })
                })
                .then(|object| Ok(Step::Value(Some(object))))
                .catch(|_absent| Ok(Step::Value(None)))
            })
            .collect();

        let outcomes = Promise::all(attempts).wait().await?;
        Ok(outcomes.into_iter().flatten().next())
    }

    /// Walk `order` and commit the payload to the first online backend.
    /// An approval rejection means the id is claimed and aborts the walk.
    pub(crate) async fn write_via(
        &self,
        payload: &WritePayload,
        order: &[usize],
    ) -> GatewayResult<usize> {
        self.ensure_open()?;

        for &index in order {
            if index >= self.sockets.len() || self.is_excluded(index) {
                continue;
            }
            let socket = &self.sockets[index];

            let Some(latency) = socket.is_online().wait().await? else {
                debug!(socket = index, "backend offline, trying next");
                continue;
            };
            debug!(socket = index, latency_ms = latency, "selected online backend");

            // Decode lazily: only now has a backend agreed to listen.
            let data = decode_payload(&payload.data)?;
            let claim = ObjectClaim {
                id: payload.id.clone(),
                size: data.len() as i64,
            };
            match socket.approve_object_metadata(claim).wait().await {
                Ok(_) => {}
                Err(reason) => {
                    // The id is claimed at this backend, so it is claimed
                    // globally; do not shop the write around.
                    warn!(socket = index, id = %payload.id, error = %reason, "write refused");
                    return Err(reason);
                }
            }

            let metadata = match socket.set_object(&payload.id, data).wait().await {
                Ok(metadata) => metadata,
                Err(reason) => {
                    warn!(socket = index, id = %payload.id, error = %reason, "blob write failed");
                    return Err(reason);
                }
            };
            debug!(socket = index, id = %metadata.id, size = metadata.size, "blob committed");
            return Ok(index);
        }

        Err(GatewayError::NoBackendOnline)
    }

    pub(crate) async fn init_sockets(&self) -> GatewayResult<()> {
        let ready = self.ready.fresh();
        self.closed.store(false, Ordering::SeqCst);

        // Tolerate individual failures: a failing backend is logged and
        // excluded, not fatal.
        let attempts: Vec<Promise<bool>> = self
            .sockets
            .iter()
            .enumerate()
            .map(|(index, socket)| {
                socket.init().catch(move |reason| {
                    warn!(socket = index, error = %reason, "backend init failed, excluding");
                    Ok(Step::Value(false))
                })
            })
            .collect();
        let results = Promise::all(attempts).wait().await?;

        let failed: HashSet<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, up)| !**up)
            .map(|(index, _)| index)
            .collect();
        *self.excluded.write().expect("excluded set poisoned") = failed;

        ready.resolve(true);
        Ok(())
    }

    pub(crate) async fn backup_sockets(&self) -> GatewayResult<()> {
        let attempts: Vec<Promise<()>> =
            self.sockets.iter().map(|socket| socket.backup()).collect();
        Promise::all(attempts).wait().await?;
        Ok(())
    }

    pub(crate) async fn close_sockets(&self) -> GatewayResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.reject(GatewayError::Closed);

        self.backup_sockets().await?;

        let attempts: Vec<Promise<()>> =
            self.sockets.iter().map(|socket| socket.close()).collect();
        Promise::all(attempts).wait().await?;
        Ok(())
    }
}

#[async_trait]
impl Frontend for StatelessFrontend {
    async fn init(&self) -> GatewayResult<()> {
        self.init_sockets().await
    }

    fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    async fn write_object(
        &self,
        payload: &WritePayload,
        _bearer: Option<&str>,
    ) -> GatewayResult<usize> {
        self.write_via(payload, &self.shuffled_order()).await
    }

    async fn read_object(
        &self,
        id: &str,
        _bearer: Option<&str>,
    ) -> GatewayResult<Option<StoredObject>> {
        self.read_from(id, &self.all_indices()).await
    }

    async fn backup(&self) -> GatewayResult<()> {
        self.backup_sockets().await
    }

    async fn close(&self) -> GatewayResult<()> {
        self.close_sockets().await
    }
}
