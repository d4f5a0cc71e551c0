//! SQLite-backed blob socket.
//!
//! One table holds metadata and blob bytes in the same row, so both are
//! durable together:
//!
//! ```sql
//! CREATE TABLE storage (
//!     id TEXT PRIMARY KEY,
//!     size INTEGER NOT NULL,
//!     created_at INTEGER NOT NULL,
//!     data BLOB NOT NULL
//! )
//! ```

use std::sync::Arc;
use std::time::Instant;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use tokio::sync::RwLock;

use super::{BackendSocket, ObjectClaim, ObjectMetadata, ReadyCell, now_millis, with_deadline};
use crate::config::DbSocketConfig;
use crate::promise::Promise;
use crate::{GatewayError, GatewayResult};

struct DbInner {
    config: DbSocketConfig,
    ready: ReadyCell,
    conn: RwLock<Option<DatabaseConnection>>,
}

impl DbInner {
    async fn connection(&self) -> GatewayResult<DatabaseConnection> {
        self.conn.read().await.clone().ok_or(GatewayError::Closed)
    }

    fn select(&self, sql: &str, values: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
    }

    async fn exists(&self, conn: &DatabaseConnection, id: &str) -> GatewayResult<bool> {
        let row = conn
            .query_one(self.select(
                &format!("SELECT 1 FROM {} WHERE id = ?", self.config.name),
                vec![id.into()],
            ))
            .await?;
        Ok(row.is_some())
    }
}

/// Blob socket over an embedded SQLite file.
#[derive(Clone)]
pub struct DbSocket {
    inner: Arc<DbInner>,
}

impl DbSocket {
    pub fn new(config: DbSocketConfig) -> Self {
        Self {
            inner: Arc::new(DbInner {
                config,
                ready: ReadyCell::new(),
                conn: RwLock::new(None),
            }),
        }
    }
}

impl BackendSocket for DbSocket {
    fn init(&self) -> Promise<bool> {
        let ready = self.inner.ready.fresh();
        let inner = self.inner.clone();
        ready.adopt(Promise::spawn(async move {
            let url = format!("sqlite://{}?mode=rwc", inner.config.path);
            let conn = Database::connect(&url).await?;
            conn.execute(Statement::from_string(
                DbBackend::Sqlite,
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, size INTEGER NOT NULL, \
                     created_at INTEGER NOT NULL, data BLOB NOT NULL)",
                    inner.config.name
                ),
            ))
            .await?;
            *inner.conn.write().await = Some(conn);
            Ok(true)
        }));
        ready
    }

    fn is_ready(&self) -> Promise<bool> {
        self.inner.ready.current()
    }

    // The store flushes on every write; nothing to persist here.
    fn backup(&self) -> Promise<()> {
        Promise::resolved(())
    }

    fn close(&self) -> Promise<()> {
        self.inner.ready.reject(GatewayError::Closed);
        let inner = self.inner.clone();
        Promise::spawn(async move {
            if let Some(conn) = inner.conn.write().await.take() {
                conn.close().await?;
            }
            Ok(())
        })
    }

    fn is_online(&self) -> Promise<Option<u64>> {
        let inner = self.inner.clone();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let started = Instant::now();
                let Ok(conn) = inner.connection().await else {
                    return Ok(None);
                };
                match conn.query_one(inner.select("SELECT 1", Vec::new())).await {
                    Ok(_) => Ok(Some(started.elapsed().as_millis() as u64)),
                    Err(_) => Ok(None),
                }
            }),
            budget,
        )
        .catch(|_| Ok(crate::promise::Step::Value(None)))
    }

    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata> {
        let inner = self.inner.clone();
        let id = id.to_string();
        let budget = self.inner.config.timeout();
        with_deadline(
            Promise::spawn(async move {
                let conn = inner.connection().await?;
                let row = conn
                    .query_one(inner.select(
                        &format!(
                            "SELECT size, created_at FROM {} WHERE id = ?",
                            inner.config.name
                        ),
                        vec![id.clone().into()],
                    ))
                    .await?
                    .ok_or_else(|| GatewayError::NotFound(id.clone()))?;
                Ok(ObjectMetadata {
                    id,
                    size: row.try_get("", "size")?,
                    created_at: row.try_get("", "created_at")?,
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
                let conn = inner.connection().await?;
                if inner.exists(&conn, &claim.id).await? {
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
                let conn = inner.connection().await?;
                let row = conn
                    .query_one(inner.select(
                        &format!("SELECT data FROM {} WHERE id = ?", inner.config.name),
                        vec![id.clone().into()],
                    ))
                    .await?
                    .ok_or(GatewayError::NotFound(id))?;
                Ok(row.try_get("", "data")?)
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
                let conn = inner.connection().await?;
                if inner.exists(&conn, &id).await? {
                    return Err(GatewayError::AlreadyExists(id));
                }
                let metadata = ObjectMetadata {
                    id: id.clone(),
                    size: data.len() as i64,
                    created_at: now_millis(),
                };
                conn.execute(inner.select(
                    &format!(
                        "INSERT INTO {} (id, size, created_at, data) VALUES (?, ?, ?, ?)",
                        inner.config.name
                    ),
                    vec![
                        id.into(),
                        metadata.size.into(),
                        metadata.created_at.into(),
                        data.into(),
                    ],
                ))
                .await?;
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
                let conn = inner.connection().await?;
                let result = conn
                    .execute(inner.select(
                        &format!("DELETE FROM {} WHERE id = ?", inner.config.name),
                        vec![id.into()],
                    ))
                    .await?;
                Ok(result.rows_affected() > 0)
            }),
            budget,
        )
    }
}
