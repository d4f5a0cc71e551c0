//! Frontend dispatchers.
//!
//! A *frontend* owns an ordered set of backend sockets and presents one
//! namespace over them. Two implementations exist:
//!
//! - [`stateless::StatelessFrontend`]: writes go to a randomly chosen
//!   online backend, reads fan out across all backends in parallel
//! - [`stateful::StatefulFrontend`]: layers a persistent id→(alias,
//!   bearer) index over the stateless dispatcher and enforces bearer
//!   authorization
//!
//! The external HTTP controller consumes frontends through the
//! [`Frontend`] trait and receives its instance by injection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::GatewayResult;
use crate::backend::ObjectMetadata;
use crate::promise::Promise;

pub mod stateful;
pub mod stateless;

/// What the write path accepts: an id plus base64 data, decoded lazily
/// (only once a backend has agreed to take the write).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritePayload {
    pub id: String,
    pub data: String,
}

/// A blob resolved by the read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub metadata: ObjectMetadata,
    pub data: Vec<u8>,
}

/// The dispatcher contract the HTTP controller consumes.
#[async_trait]
pub trait Frontend: Send + Sync {
    /// Bring up the frontend's own store (if any) and every backend,
    /// tolerating individual backend failures.
    async fn init(&self) -> GatewayResult<()>;

    /// Fulfills once initialization completes; rejected after `close`.
    fn is_ready(&self) -> Promise<bool>;

    /// Store a blob, returning the index of the backend that took it.
    async fn write_object(
        &self,
        payload: &WritePayload,
        bearer: Option<&str>,
    ) -> GatewayResult<usize>;

    /// Resolve a blob; `None` means the id is absent everywhere the
    /// frontend is willing to look.
    async fn read_object(
        &self,
        id: &str,
        bearer: Option<&str>,
    ) -> GatewayResult<Option<StoredObject>>;

    /// Fan a backup out to every backend.
    async fn backup(&self) -> GatewayResult<()>;

    /// Reject `is_ready`, persist pending state, close every backend.
    async fn close(&self) -> GatewayResult<()>;
}

/// Absent and empty bearers both mean "public".
pub(crate) fn normalize_bearer(bearer: Option<&str>) -> String {
    bearer.unwrap_or_default().to_string()
}

/// Decode the base64 payload body; malformed input is a client error.
pub(crate) fn decode_payload(data: &str) -> GatewayResult<Vec<u8>> {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    STANDARD
        .decode(data)
        .map_err(|e| crate::GatewayError::Payload(format!("invalid base64 data: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bearer() {
        assert_eq!(normalize_bearer(None), "");
        assert_eq!(normalize_bearer(Some("")), "");
        assert_eq!(normalize_bearer(Some("tok-A")), "tok-A");
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("SGVsbG8gV29ybGQh").unwrap(), b"Hello World!");
        assert!(matches!(
            decode_payload("%%% not base64 %%%"),
            Err(crate::GatewayError::Payload(_))
        ));
    }
}
