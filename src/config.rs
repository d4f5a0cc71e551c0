//! Per-component configuration.
//!
//! Every component takes an explicit config struct. All fields carry
//! defaults and deserialize with `#[serde(default)]`, so a partial
//! document merges over the default record.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the SQLite blob backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbSocketConfig {
    /// Store file location.
    pub path: String,
    /// Blob table name.
    pub name: String,
    /// Per-operation budget in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DbSocketConfig {
    fn default() -> Self {
        Self {
            path: "data/storage.db".into(),
            name: "storage".into(),
            timeout_ms: 5_000,
        }
    }
}

impl DbSocketConfig {
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for the filesystem blob backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FsSocketConfig {
    /// Directory holding the numerically named blob files.
    pub root: String,
    /// Sidecar JSON metadata file.
    pub meta_table: String,
    /// Per-operation budget in milliseconds.
    pub timeout_ms: u64,
}

impl Default for FsSocketConfig {
    fn default() -> Self {
        Self {
            root: "data/blobs".into(),
            meta_table: "data/blobs.meta.json".into(),
            timeout_ms: 5_000,
        }
    }
}

impl FsSocketConfig {
    pub fn with_root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn with_meta_table(mut self, meta_table: &str) -> Self {
        self.meta_table = meta_table.to_string();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for the S3-compatible object-store backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3SocketConfig {
    /// Host (and optional port) of the object store, no scheme. Hosts
    /// without a scheme are reached over plain HTTP.
    pub host: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Per-request budget in milliseconds (connect and read).
    pub timeout_ms: u64,
}

impl Default for S3SocketConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:9000".into(),
            bucket: "blobs".into(),
            access_key: String::new(),
            secret_key: String::new(),
            timeout_ms: 10_000,
        }
    }
}

impl S3SocketConfig {
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    pub fn with_credentials(mut self, access_key: &str, secret_key: &str) -> Self {
        self.access_key = access_key.to_string();
        self.secret_key = secret_key.to_string();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for the stateful frontend's id index.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index file location.
    pub path: String,
    /// Index table name.
    pub name: String,
    /// Ordered backend aliases; length must equal the socket count.
    pub aliases: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: "data/index.db".into(),
            name: "objects".into(),
            aliases: Vec::new(),
        }
    }
}

impl IndexConfig {
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}
