//! S3-compatible blob socket.
//!
//! Every operation maps to one signed HTTP request against
//! `/{bucket}/{id}` (the id is embedded verbatim; callers produce
//! URL-safe ids). Requests carry AWS SigV4 headers from [`crate::signer`]
//! and are raced against a timer cell so a hung socket fails
//! deterministically.

use std::sync::Arc;
use std::time::Instant;

use chrono::DateTime;
use reqwest::Client;
use tokio::sync::RwLock;

use super::{BackendSocket, ObjectClaim, ObjectMetadata, ReadyCell, with_deadline};
use crate::config::S3SocketConfig;
use crate::promise::{Promise, Step};
use crate::signer::{Payload, SigningConfig, sign_request};
use crate::{GatewayError, GatewayResult};

struct S3Inner {
    config: S3SocketConfig,
    ready: ReadyCell,
    client: RwLock<Option<Client>>,
}

impl S3Inner {
    fn base_url(&self) -> String {
        if self.config.host.contains("://") {
            self.config.host.clone()
        } else {
            // Hosts without a scheme are the supervised local object
            // store, reached over plain HTTP.
            format!("http://{}", self.config.host)
        }
    }

    fn host_header(&self) -> &str {
        match self.config.host.split_once("://") {
            Some((_, rest)) => rest,
            None => &self.config.host,
        }
    }

    fn object_path(&self, id: &str) -> String {
        format!("/{}/{}", self.config.bucket, id)
    }

    fn network_error(&self, error: reqwest::Error) -> GatewayError {
        GatewayError::Network {
            host: self.config.host.clone(),
            message: error.to_string(),
        }
    }

    async fn client(&self) -> GatewayResult<Client> {
        self.client.read().await.clone().ok_or(GatewayError::Closed)
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        query: &str,
        payload: Payload,
        body: Option<Vec<u8>>,
    ) -> GatewayResult<reqwest::Response> {
        let client = self.client().await?;
        let signing = SigningConfig::default()
            .with_method(method)
            .with_query(query)
            .with_payload(payload);
        let headers = sign_request(
            self.host_header(),
            path,
            &self.config.access_key,
            &self.config.secret_key,
            &signing,
        );

        let mut url = format!("{}{}", self.base_url(), path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        let mut request = match method {
            "HEAD" => client.head(&url),
            "PUT" => client.put(&url),
            "DELETE" => client.delete(&url),
            _ => client.get(&url),
        };
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        request.send().await.map_err(|e| self.network_error(e))
    }

    async fn fetch_metadata(&self, id: &str) -> GatewayResult<ObjectMetadata> {
        let response = self
            .send("GET", &self.object_path(id), "attributes=", Payload::Unsigned, None)
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::NotFound(id.to_string()));
        }

        // Last-Modified has second precision; scaled to milliseconds.
        let created_at = response
            .headers()
            .get("last-modified")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|stamp| stamp.timestamp() * 1000)
            .ok_or_else(|| {
                GatewayError::Backend(format!("object store sent no Last-Modified for {id}"))
            })?;

        let body = response.text().await.map_err(|e| self.network_error(e))?;
        let size = object_size(&body).ok_or_else(|| {
            GatewayError::Backend(format!("object store sent no ObjectSize for {id}"))
        })?;

        Ok(ObjectMetadata {
            id: id.to_string(),
            size,
            created_at,
        })
    }
}

/// Extract `<ObjectSize>…</ObjectSize>` from an attributes response body.
fn object_size(xml: &str) -> Option<i64> {
    let start = xml.find("<ObjectSize>")? + "<ObjectSize>".len();
    let end = start + xml[start..].find("</ObjectSize>")?;
    xml[start..end].trim().parse().ok()
}

/// Blob socket over a remote S3-compatible object store.
#[derive(Clone)]
pub struct S3Socket {
    inner: Arc<S3Inner>,
}

impl S3Socket {
    pub fn new(config: S3SocketConfig) -> Self {
        Self {
            inner: Arc::new(S3Inner {
                config,
                ready: ReadyCell::new(),
                client: RwLock::new(None),
            }),
        }
    }
}

impl BackendSocket for S3Socket {
    fn init(&self) -> Promise<bool> {
        let ready = self.inner.ready.fresh();
        let inner = self.inner.clone();
        ready.adopt(Promise::spawn(async move {
            let client = Client::builder()
                .connect_timeout(inner.config.timeout())
                .timeout(inner.config.timeout())
                .build()
                .map_err(|e| GatewayError::Backend(e.to_string()))?;
            *inner.client.write().await = Some(client);
            Ok(true)
        }));
        ready
    }

    fn is_ready(&self) -> Promise<bool> {
        self.inner.ready.current()
    }

    // The remote store owns durability for everything we ever sent it.
    fn backup(&self) -> Promise<()> {
        Promise::resolved(())
    }

    fn close(&self) -> Promise<()> {
        self.inner.ready.reject(GatewayError::Closed);
        let inner = self.inner.clone();
        Promise::spawn(async move {
            inner.client.write().await.take();
            Ok(())
        })
    }

    fn is_online(&self) -> Promise<Option<u64>> {
        let inner = self.inner.clone();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let started = Instant::now();
                let path = format!("/{}", inner.config.bucket);
                // Any HTTP response proves the store is reachable.
                match inner.send("HEAD", &path, "", Payload::Unsigned, None).await {
                    Ok(_) => Ok(Some(started.elapsed().as_millis() as u64)),
                    Err(_) => Ok(None),
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
            Promise::spawn(async move { inner.fetch_metadata(&id).await }),
            budget,
        )
    }

    fn approve_object_metadata(&self, claim: ObjectClaim) -> Promise<bool> {
        let inner = self.inner.clone();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let response = inner
                    .send(
                        "HEAD",
                        &inner.object_path(&claim.id),
                        "",
                        Payload::Unsigned,
                        None,
                    )
                    .await?;
                // A present object answers 2xx on HEAD; anything else
                // means the id is free.
                if response.status().is_success() {
                    Err(GatewayError::AlreadyExists(claim.id))
                } else {
                    Ok(true)
                }
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
                let response = inner
                    .send("GET", &inner.object_path(&id), "", Payload::Unsigned, None)
                    .await?;
                if !response.status().is_success() {
                    return Err(GatewayError::NotFound(id));
                }
                let body = response.bytes().await.map_err(|e| inner.network_error(e))?;
                Ok(body.to_vec())
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
                let head = inner
                    .send("HEAD", &inner.object_path(&id), "", Payload::Unsigned, None)
                    .await?;
                if head.status().is_success() {
                    return Err(GatewayError::AlreadyExists(id));
                }

                let response = inner
                    .send(
                        "PUT",
                        &inner.object_path(&id),
                        "",
                        Payload::Bytes(data.clone()),
                        Some(data),
                    )
                    .await?;
                if !response.status().is_success() {
                    return Err(GatewayError::Backend(format!(
                        "object store refused PUT for {id}: {}",
                        response.status()
                    )));
                }

                inner.fetch_metadata(&id).await
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
                let response = inner
                    .send("DELETE", &inner.object_path(&id), "", Payload::Unsigned, None)
                    .await?;
                // Stores answer DELETE with 204 No Content.
                Ok(response.status().is_success())
            }),
            budget,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_size_extraction() {
        let body = "<GetObjectAttributesOutput><ObjectSize>12</ObjectSize></GetObjectAttributesOutput>";
        assert_eq!(object_size(body), Some(12));

        let padded = "<ObjectSize> 4096 </ObjectSize>";
        assert_eq!(object_size(padded), Some(4096));

        assert_eq!(object_size("<NoSizeHere/>"), None);
        assert_eq!(object_size("<ObjectSize>abc</ObjectSize>"), None);
    }

    #[test]
    fn test_object_path_embeds_id_verbatim() {
        let socket = S3Socket::new(
            S3SocketConfig::default()
                .with_host("store.local:9000")
                .with_bucket("vault"),
        );
        assert_eq!(socket.inner.object_path("hello.txt"), "/vault/hello.txt");
    }

    #[test]
    fn test_base_url_and_host_header() {
        let plain = S3Socket::new(S3SocketConfig::default().with_host("store.local:9000"));
        assert_eq!(plain.inner.base_url(), "http://store.local:9000");
        assert_eq!(plain.inner.host_header(), "store.local:9000");

        let schemed = S3Socket::new(
            S3SocketConfig::default().with_host("https://bucket.s3.amazonaws.com"),
        );
        assert_eq!(schemed.inner.base_url(), "https://bucket.s3.amazonaws.com");
        assert_eq!(schemed.inner.host_header(), "bucket.s3.amazonaws.com");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_offline_not_an_error() {
        let socket = S3Socket::new(
            S3SocketConfig::default()
                .with_host("127.0.0.1:1")
                .with_bucket("vault"),
        );
        socket.init().wait().await.unwrap();
        assert_eq!(socket.is_online().wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_reads_with_network_error() {
        let socket = S3Socket::new(
            S3SocketConfig::default()
                .with_host("127.0.0.1:1")
                .with_bucket("vault"),
        );
        socket.init().wait().await.unwrap();
        match socket.get_object("any").wait().await {
            Err(GatewayError::Network { host, .. }) => assert_eq!(host, "127.0.0.1:1"),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let socket = S3Socket::new(S3SocketConfig::default());
        socket.init().wait().await.unwrap();
        socket.close().wait().await.unwrap();
        assert!(matches!(
            socket.get_object("any").wait().await,
            Err(GatewayError::Closed)
        ));
    }

    // The remaining coverage needs a live S3-compatible server.
    // Run: docker run --rm -p 9000:9000 minio/minio server /data

    #[tokio::test]
    #[ignore] // Requires an S3-compatible server on 127.0.0.1:9000
    async fn test_round_trip_against_live_store() {
        let socket = S3Socket::new(
            S3SocketConfig::default()
                .with_host("127.0.0.1:9000")
                .with_bucket("blobgate-test")
                .with_credentials("minioadmin", "minioadmin"),
        );
        socket.init().wait().await.unwrap();

        let id = "live-round-trip";
        let _ = socket.del_object(id).wait().await;

        let metadata = socket
            .set_object(id, b"payload".to_vec())
            .wait()
            .await
            .unwrap();
        assert_eq!(metadata.size, 7);
        assert!(metadata.created_at > 0);

        assert_eq!(socket.get_object(id).wait().await.unwrap(), b"payload");
        assert!(matches!(
            socket
                .approve_object_metadata(ObjectClaim {
                    id: id.into(),
                    size: 7
                })
                .wait()
                .await,
            Err(GatewayError::AlreadyExists(_))
        ));

        assert!(socket.del_object(id).wait().await.unwrap());
    }
}
