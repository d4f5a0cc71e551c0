//! The stateful dispatcher: an authoritative id index over the stateless
//! one.
//!
//! Every successful write records `{id, backend alias, bearer}` in a
//! small SQLite table. Reads consult the index first: they go to exactly
//! the backend that holds the blob, and they enforce bearer ownership
//! (an empty stored bearer means the object is public).

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use tokio::sync::RwLock;
use tracing::error;

use super::{Frontend, StoredObject, WritePayload, normalize_bearer};
use crate::backend::{BackendSocket, ReadyCell};
use crate::config::IndexConfig;
use crate::frontend::stateless::StatelessFrontend;
use crate::promise::Promise;
use crate::{GatewayError, GatewayResult};

/// One row of the id index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub backend: String,
    pub bearer: String,
}

/// Dispatcher with a persistent index and bearer authorization.
pub struct StatefulFrontend {
    dispatch: StatelessFrontend,
    config: IndexConfig,
    ready: ReadyCell,
    index: RwLock<Option<DatabaseConnection>>,
}

impl StatefulFrontend {
    /// Construct over `sockets`; `config.aliases` must name each socket,
    /// in order.
    pub fn new(
        sockets: Vec<Arc<dyn BackendSocket>>,
        config: IndexConfig,
    ) -> GatewayResult<Self> {
        if config.aliases.len() != sockets.len() {
            return Err(GatewayError::Frontend(format!(
                "{} aliases configured for {} backend sockets",
                config.aliases.len(),
                sockets.len()
            )));
        }
        Ok(Self {
            dispatch: StatelessFrontend::new(sockets),
            config,
            ready: ReadyCell::new(),
            index: RwLock::new(None),
        })
    }

    fn statement(&self, sql: &str, values: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
    }

    async fn index_handle(&self) -> GatewayResult<DatabaseConnection> {
        self.index.read().await.clone().ok_or(GatewayError::Closed)
    }

    /// Look an id up in the index.
    pub async fn lookup(&self, id: &str) -> GatewayResult<Option<IndexEntry>> {
        let conn = self.index_handle().await?;
        let row = conn
            .query_one(self.statement(
                &format!(
                    "SELECT id, backend, bearer FROM {} WHERE id = ?",
                    self.config.name
                ),
                vec![id.into()],
            ))
            .await?;
        match row {
            Some(row) => Ok(Some(IndexEntry {
                id: row.try_get("", "id")?,
                backend: row.try_get("", "backend")?,
                bearer: row.try_get("", "bearer")?,
            })),
            None => Ok(None),
        }
    }

    async fn insert(&self, entry: &IndexEntry) -> GatewayResult<()> {
        let conn = self.index_handle().await?;
        conn.execute(self.statement(
            &format!(
                "INSERT INTO {} (id, backend, bearer) VALUES (?, ?, ?)",
                self.config.name
            ),
            vec![
                entry.id.clone().into(),
                entry.backend.clone().into(),
                entry.bearer.clone().into(),
            ],
        ))
        .await?;
        Ok(())
    }

    fn socket_for(&self, alias: &str) -> GatewayResult<usize> {
        self.config
            .aliases
            .iter()
            .position(|candidate| candidate == alias)
            .ok_or_else(|| {
                GatewayError::Frontend(format!("index names unknown backend alias {alias}"))
            })
    }
}

#[async_trait]
impl Frontend for StatefulFrontend {
    async fn init(&self) -> GatewayResult<()> {
        let ready = self.ready.fresh();

        let outcome = async {
            let url = format!("sqlite://{}?mode=rwc", self.config.path);
            let conn = Database::connect(&url).await?;
            conn.execute(Statement::from_string(
                DbBackend::Sqlite,
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, backend TEXT NOT NULL, \
                     bearer TEXT NOT NULL)",
                    self.config.name
                ),
            ))
            .await?;
            *self.index.write().await = Some(conn);

            self.dispatch.init().await
        }
        .await;

        match outcome {
            Ok(()) => {
                ready.resolve(true);
                Ok(())
            }
            Err(reason) => {
                ready.reject(reason.clone());
                Err(reason)
            }
        }
    }

    fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    async fn write_object(
        &self,
        payload: &WritePayload,
        bearer: Option<&str>,
    ) -> GatewayResult<usize> {
        let bearer = normalize_bearer(bearer);

        // The index is authoritative for the whole namespace, so the
        // duplicate check happens before any backend is consulted.
        if self.lookup(&payload.id).await?.is_some() {
            return Err(GatewayError::AlreadyExists(payload.id.clone()));
        }

        let index = self.dispatch.write_via(payload, &self.dispatch.shuffled_order()).await?;

        let entry = IndexEntry {
            id: payload.id.clone(),
            backend: self.config.aliases[index].clone(),
            bearer,
        };
        if let Err(reason) = self.insert(&entry).await {
            // The blob landed but the namespace has no record of it.
            error!(id = %payload.id, backend = %entry.backend, error = %reason,
                   "blob stored but index commit failed");
            return Err(reason);
        }
        Ok(index)
    }

    async fn read_object(
        &self,
        id: &str,
        bearer: Option<&str>,
    ) -> GatewayResult<Option<StoredObject>> {
        let bearer = normalize_bearer(bearer);

        let Some(entry) = self.lookup(id).await? else {
            return Ok(None);
        };

        // An empty stored bearer is public; otherwise owners only.
        if !entry.bearer.is_empty() && entry.bearer != bearer {
            return Err(GatewayError::Unauthorized);
        }

        let socket = self.socket_for(&entry.backend)?;
        self.dispatch.read_from(id, &[socket]).await
    }

    async fn backup(&self) -> GatewayResult<()> {
        self.dispatch.backup().await
    }

    async fn close(&self) -> GatewayResult<()> {
        self.ready.reject(GatewayError::Closed);
        if let Some(conn) = self.index.write().await.take() {
            conn.close().await?;
        }
        self.dispatch.close().await
    }
}
