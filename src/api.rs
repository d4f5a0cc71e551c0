//! Interface types for the external HTTP controller.
//!
//! The controller itself lives outside this crate; it receives its
//! [`crate::Frontend`] by injection and uses these helpers to translate
//! between HTTP and dispatcher calls:
//!
//! | Method | Path             | Success | Failure                       |
//! |--------|------------------|---------|-------------------------------|
//! | POST   | `/v1/blobs`      | 201     | 415 / 422 / 503               |
//! | GET    | `/v1/blobs/{id}` | 200     | 401 / 404                     |

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::GatewayError;
use crate::frontend::StoredObject;

/// Re-exported as the POST body: `{id, data: base64}`.
pub use crate::frontend::WritePayload;

/// GET response body: metadata plus the base64-encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    pub id: String,
    pub size: i64,
    pub created_at: i64,
    pub data: String,
}

impl From<StoredObject> for BlobRecord {
    fn from(stored: StoredObject) -> Self {
        Self {
            id: stored.metadata.id,
            size: stored.metadata.size,
            created_at: stored.metadata.created_at,
            data: STANDARD.encode(stored.data),
        }
    }
}

/// Extract the bearer token from an `Authorization` header value: the
/// substring after a leading `Bearer`, whitespace-trimmed. Anything not
/// starting with `Bearer` is no bearer at all.
pub fn bearer_token(header: Option<&str>) -> Option<String> {
    let rest = header?.strip_prefix("Bearer")?;
    Some(rest.trim().to_string())
}

/// HTTP status for a failed dispatcher call.
pub fn status_for(error: &GatewayError) -> u16 {
    match error {
        GatewayError::Unauthorized => 401,
        GatewayError::NotFound(_) => 404,
        GatewayError::AlreadyExists(_) | GatewayError::Payload(_) => 422,
        GatewayError::NoBackendOnline | GatewayError::Closed => 503,
        GatewayError::Backend(_)
        | GatewayError::Network { .. }
        | GatewayError::Timeout(_)
        | GatewayError::Frontend(_) => 500,
    }
}
