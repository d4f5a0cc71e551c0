//! # Blobgate
//!
//! A blob storage gateway: opaque binary objects identified by
//! client-supplied string IDs, transparently dispersed across one of
//! several heterogeneous storage backends. Clients see a single namespace
//! with optional per-object ownership ("bearer") enforcement.
//!
//! The crate is organized around a small set of modules:
//!
//! - `promise`: single-assignment value cells with chaining, catching and
//!   combinators — the concurrency currency of the whole crate
//! - `crypto` / `signer`: SHA-256/HMAC helpers and the AWS SigV4 signer
//! - `backend`: the uniform socket contract plus the three concrete
//!   backends (SQLite table, filesystem tree, S3-compatible store)
//! - `frontend`: the stateless dispatcher (fan-out read, randomized
//!   write) and the stateful dispatcher (persistent index + bearer auth)
//! - `api`: interface types for the external HTTP controller
//! - `config`: per-component configuration with defaults-merge
//!
//! ## Example
//!
//! ```rust,no_run
//! use blobgate::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> GatewayResult<()> {
//! let sockets: Vec<Arc<dyn BackendSocket>> = vec![
//!     Arc::new(DbSocket::new(DbSocketConfig::default())),
//!     Arc::new(FsSocket::new(FsSocketConfig::default())),
//! ];
//! let config = IndexConfig::default().with_aliases(["db_1", "fs_1"]);
//! let gateway = StatefulFrontend::new(sockets, config)?;
//! gateway.init().await?;
//!
//! let payload = WritePayload {
//!     id: "hello.txt".into(),
//!     data: "SGVsbG8gV29ybGQh".into(),
//! };
//! let chosen = gateway.write_object(&payload, Some("tok-A")).await?;
//! let blob = gateway.read_object("hello.txt", Some("tok-A")).await?;
//! # let _ = (chosen, blob);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod frontend;
pub mod promise;
pub mod signer;

// ============================================================================
// CORE RE-EXPORTS
// ============================================================================

pub use backend::{BackendSocket, ObjectClaim, ObjectMetadata};
pub use backend::{db::DbSocket, fs::FsSocket, s3::S3Socket};
pub use config::{DbSocketConfig, FsSocketConfig, IndexConfig, S3SocketConfig};
pub use frontend::{
    Frontend, StoredObject, WritePayload, stateful::StatefulFrontend,
    stateless::StatelessFrontend,
};
pub use promise::{Promise, PromiseState, Settled, Step};

/// Convenient re-exports for common types and traits
pub mod prelude {
    pub use crate::api::{bearer_token, status_for};
    pub use crate::backend::{BackendSocket, ObjectClaim, ObjectMetadata};
    pub use crate::backend::{db::DbSocket, fs::FsSocket, s3::S3Socket};
    pub use crate::config::{DbSocketConfig, FsSocketConfig, IndexConfig, S3SocketConfig};
    pub use crate::frontend::{
        Frontend, StoredObject, WritePayload, stateful::StatefulFrontend,
        stateless::StatelessFrontend,
    };
    pub use crate::promise::{Promise, PromiseState, Settled, Step};
    pub use crate::{GatewayError, GatewayResult};
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Common error type for gateway operations.
///
/// The type is `Clone` because the promise runtime fans a single rejection
/// reason out to every dependent child; variants therefore carry owned
/// strings rather than source errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The requested object does not exist at the queried backend
    #[error("object not found: {0}")]
    NotFound(String),

    /// The id is already claimed, at a backend or in the index
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// A storage backend failed (I/O, SQL, unexpected response)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The remote store could not be reached
    #[error("network error reaching {host}: {message}")]
    Network { host: String, message: String },

    /// A raced deadline fired before the operation settled
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// Bearer presented on read does not match the stored bearer
    #[error("bearer does not match object owner")]
    Unauthorized,

    /// Malformed client input (undecodable base64, missing fields)
    #[error("malformed payload: {0}")]
    Payload(String),

    /// Every configured backend was offline during a write walk
    #[error("no storage backend online")]
    NoBackendOnline,

    /// The frontend or socket has been closed
    #[error("gateway is closed")]
    Closed,

    /// Dispatcher-level misconfiguration (alias list mismatch, unknown alias)
    #[error("frontend error: {0}")]
    Frontend(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(error: std::io::Error) -> Self {
        GatewayError::Backend(error.to_string())
    }
}

impl From<sea_orm::DbErr> for GatewayError {
    fn from(error: sea_orm::DbErr) -> Self {
        GatewayError::Backend(error.to_string())
    }
}
