//! Storage backend sockets.
//!
//! A *backend socket* wraps one concrete store (SQLite table, filesystem
//! tree, or S3 bucket) in the uniform [`BackendSocket`] contract the
//! dispatchers consume:
//!
//! - lifecycle: `init` / `is_ready` / `backup` / `close`
//! - liveness: `is_online` (never rejects; absent means offline)
//! - objects: `get_object_metadata` / `approve_object_metadata` /
//!   `get_object` / `set_object` / `del_object`
//!
//! Every operation returns a [`Promise`], so the dispatchers can compose
//! per-backend calls with `all`/`race` and bound them with deadlines.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::promise::Promise;
use crate::GatewayError;

pub mod db;
pub mod fs;
pub mod s3;

/// What a backend knows about a committed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub id: String,
    /// Post-decode byte count.
    pub size: i64,
    /// Milliseconds since the Unix epoch, assigned at commit time.
    pub created_at: i64,
}

/// A write reservation checked before any bytes move.
#[derive(Debug, Clone)]
pub struct ObjectClaim {
    pub id: String,
    pub size: i64,
}

/// The uniform contract every concrete backend satisfies.
pub trait BackendSocket: Send + Sync {
    /// Idempotent bring-up. Replaces `is_ready` with a fresh pending cell,
    /// then settles it with the outcome.
    fn init(&self) -> Promise<bool>;

    /// Fulfills `true` once the backend has initialized; rejected with a
    /// closed reason after `close`.
    fn is_ready(&self) -> Promise<bool>;

    /// Durably persist any in-memory state that is not already durable.
    fn backup(&self) -> Promise<()>;

    /// Release resources; `is_ready` rejects and later operations fail.
    fn close(&self) -> Promise<()>;

    /// Liveness probe: latency in milliseconds, or `None` on any failure.
    /// Never rejects.
    fn is_online(&self) -> Promise<Option<u64>>;

    /// Rejects if the id is not present.
    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata>;

    /// Rejects if the id already exists; otherwise fulfills `true`.
    fn approve_object_metadata(&self, claim: ObjectClaim) -> Promise<bool>;

    /// Rejects if the id is not present.
    fn get_object(&self, id: &str) -> Promise<Vec<u8>>;

    /// Rejects if the id already exists; on success returns the committed
    /// metadata including `created_at`.
    fn set_object(&self, id: &str, data: Vec<u8>) -> Promise<ObjectMetadata>;

    /// Test affordance: remove an object, reporting whether it existed.
    fn del_object(&self, id: &str) -> Promise<bool>;
}

/// Replaceable readiness cell shared by the socket implementations.
pub(crate) struct ReadyCell {
    cell: Mutex<Promise<bool>>,
}

impl ReadyCell {
    pub(crate) fn new() -> Self {
        Self {
            cell: Mutex::new(Promise::pending()),
        }
    }

    /// Swap in a fresh pending cell (start of `init`) and return it.
    pub(crate) fn fresh(&self) -> Promise<bool> {
        let next = Promise::pending();
        *self.cell.lock().expect("ready cell poisoned") = next.clone();
        next
    }

    pub(crate) fn current(&self) -> Promise<bool> {
        self.cell.lock().expect("ready cell poisoned").clone()
    }

    /// Revoke readiness: settle the current cell if it is still pending,
    /// and leave a rejected cell behind for later observers (a fulfilled
    /// cell cannot transition, so it is replaced instead).
    pub(crate) fn reject(&self, reason: GatewayError) {
        let mut cell = self.cell.lock().expect("ready cell poisoned");
        cell.reject(reason.clone());
        *cell = Promise::rejected(reason);
    }
}

/// Race `op` against a rejecting timer so a hung operation fails
/// deterministically. The losing task is abandoned.
pub(crate) fn with_deadline<T: Clone + Send + 'static>(
    op: Promise<T>,
    budget: Duration,
) -> Promise<T> {
    let deadline = Promise::timeout(
        None,
        Some((budget, GatewayError::Timeout(budget.as_millis() as u64))),
    );
    Promise::race(vec![op, deadline])
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory socket used by the dispatcher test suites.

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::promise::Promise;

    #[derive(Default)]
    struct MemoryInner {
        objects: Mutex<HashMap<String, (ObjectMetadata, Vec<u8>)>>,
        online: AtomicBool,
        fail_init: AtomicBool,
    }

    /// In-memory [`BackendSocket`] with toggles for liveness and init
    /// failure. Settles every promise synchronously.
    #[derive(Clone)]
    pub(crate) struct MemorySocket {
        ready: Arc<ReadyCell>,
        inner: Arc<MemoryInner>,
    }

    impl MemorySocket {
        pub(crate) fn new() -> Self {
            let socket = Self {
                ready: Arc::new(ReadyCell::new()),
                inner: Arc::new(MemoryInner::default()),
            };
            socket.inner.online.store(true, Ordering::SeqCst);
            socket
        }

        pub(crate) fn set_online(&self, online: bool) {
            self.inner.online.store(online, Ordering::SeqCst);
        }

        pub(crate) fn set_fail_init(&self, fail: bool) {
            self.inner.fail_init.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn contains(&self, id: &str) -> bool {
            self.inner.objects.lock().unwrap().contains_key(id)
        }

        pub(crate) fn object_count(&self) -> usize {
            self.inner.objects.lock().unwrap().len()
        }
    }

    impl BackendSocket for MemorySocket {
        fn init(&self) -> Promise<bool> {
            let cell = self.ready.fresh();
            if self.inner.fail_init.load(Ordering::SeqCst) {
                cell.reject(GatewayError::Backend("memory socket init failure".into()));
            } else {
                cell.resolve(true);
            }
            cell
        }

        fn is_ready(&self) -> Promise<bool> {
            self.ready.current()
        }

        fn backup(&self) -> Promise<()> {
            Promise::resolved(())
        }

        fn close(&self) -> Promise<()> {
            self.ready.reject(GatewayError::Closed);
            Promise::resolved(())
        }

        fn is_online(&self) -> Promise<Option<u64>> {
            if self.inner.online.load(Ordering::SeqCst) {
                Promise::resolved(Some(0))
            } else {
                Promise::resolved(None)
            }
        }

        fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata> {
            match self.inner.objects.lock().unwrap().get(id) {
                Some((metadata, _)) => Promise::resolved(metadata.clone()),
                None => Promise::rejected(GatewayError::NotFound(id.into())),
            }
        }

        fn approve_object_metadata(&self, claim: ObjectClaim) -> Promise<bool> {
            if self.inner.objects.lock().unwrap().contains_key(&claim.id) {
                Promise::rejected(GatewayError::AlreadyExists(claim.id))
            } else {
                Promise::resolved(true)
            }
        }

        fn get_object(&self, id: &str) -> Promise<Vec<u8>> {
            match self.inner.objects.lock().unwrap().get(id) {
                Some((_, data)) => Promise::resolved(data.clone()),
                None => Promise::rejected(GatewayError::NotFound(id.into())),
            }
        }

        fn set_object(&self, id: &str, data: Vec<u8>) -> Promise<ObjectMetadata> {
            let mut objects = self.inner.objects.lock().unwrap();
            if objects.contains_key(id) {
                return Promise::rejected(GatewayError::AlreadyExists(id.into()));
            }
            let metadata = ObjectMetadata {
                id: id.to_string(),
                size: data.len() as i64,
                created_at: now_millis(),
            };
            objects.insert(id.to_string(), (metadata.clone(), data));
            Promise::resolved(metadata)
        }

        fn del_object(&self, id: &str) -> Promise<bool> {
            Promise::resolved(self.inner.objects.lock().unwrap().remove(id).is_some())
        }
    }
}
