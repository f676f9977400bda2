//! The connection manager: lazily opens, repairs, closes, and pool-purges
//! the worker's single database connection, and switches the connection's
//! current database on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::errors::{Error, Result};
use crate::pool::{create_pool, ConnectionPool, PooledConnection, TdsClient};

/// The interval the worker polls at while a connection attempt is
/// in-flight, so that `stop()` becomes visible promptly.
const CONNECTING_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub(crate) const DEFAULT_APP_NAME: &str = "sqlreplay-worker";

/// Owns the worker's at-most-one connection. Never shared across workers.
pub(crate) struct ConnectionManager {
    connection_string: String,
    mimic_app_name: bool,
    pool: Option<ConnectionPool>,
    conn: Option<PooledConnection>,
    current_database: Option<String>,
}

impl ConnectionManager {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            connection_string: config.connection_string.clone(),
            mimic_app_name: config.mimic_application_name,
            pool: None,
            conn: None,
            current_database: None,
        }
    }

    /// True once a connection has been successfully opened and not yet
    /// torn down.
    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Returns the live connection, opening one lazily (or re-opening
    /// after a prior close/clear) if needed. `app_name` is only honored
    /// when `mimic_application_name` is set and a fresh connection is
    /// actually opened; an already-open connection keeps its login
    /// app name.
    pub(crate) async fn connection(
        &mut self,
        app_name: &str,
        stopped: &AtomicBool,
    ) -> Result<&mut TdsClient> {
        if self.conn.is_none() {
            self.open(app_name, stopped).await?;
        }
        Ok(self.conn.as_mut().expect("just opened").as_mut())
    }

    async fn open(&mut self, app_name: &str, stopped: &AtomicBool) -> Result<()> {
        let effective_app_name = if self.mimic_app_name {
            Some(app_name)
        } else {
            Some(DEFAULT_APP_NAME)
        };
        let pool = match &self.pool {
            Some(pool) => pool.clone(),
            None => {
                let pool = create_pool(&self.connection_string, effective_app_name)?;
                self.pool = Some(pool.clone());
                pool
            }
        };

        let acquire = tokio::spawn(async move { pool.get().await });
        tokio::pin!(acquire);
        loop {
            if stopped.load(Ordering::SeqCst) {
                acquire.abort();
                return Err(Error::Stopped);
            }
            match futures::future::poll_immediate(&mut acquire).await {
                Some(joined) => {
                    let conn = joined.map_err(|_| Error::Pool("connection task aborted".into()))??;
                    self.conn = Some(conn);
                    self.current_database = None;
                    return Ok(());
                }
                None => tokio::time::sleep(CONNECTING_POLL_INTERVAL).await,
            }
        }
    }

    /// Translates `source_database` through the engine's database map,
    /// opens the connection if needed, and issues a `USE` if the target
    /// differs from what's currently selected.
    pub(crate) async fn switch_database(
        &mut self,
        target_database: &str,
        app_name: &str,
        stopped: &AtomicBool,
    ) -> Result<()> {
        if self.current_database.as_deref() == Some(target_database) {
            // Make sure a connection actually exists even when no switch
            // is needed (first command on the default database).
            self.connection(app_name, stopped).await?;
            return Ok(());
        }
        let conn = self.connection(app_name, stopped).await?;
        let quoted = target_database.replace(']', "]]");
        conn.simple_query(format!("USE [{quoted}]")).await?;
        self.current_database = Some(target_database.to_owned());
        Ok(())
    }

    /// `ResetConn`: close and re-open the connection. The next command
    /// picks a fresh database context.
    pub(crate) async fn reset(&mut self, app_name: &str, stopped: &AtomicBool) -> Result<()> {
        self.conn = None;
        self.open(app_name, stopped).await
    }

    /// `ResetConnNonpooled`, fatal errors, and the out-of-band tracing
    /// path: purge this worker's pool entry and drop the connection,
    /// swallowing any error along the way.
    pub(crate) async fn clear_pool(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(deadpool::managed::Object::take(conn));
        }
        // Dropping the pool entirely discards any cached connection state;
        // the next `open` rebuilds it from scratch.
        self.pool = None;
        self.current_database = None;
    }
}
