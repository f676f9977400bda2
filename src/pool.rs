//! The `deadpool` manager for a single worker's TDS connection.
//!
//! A `Manager` impl that knows how to `create` and `recycle` one
//! connection, and a thin `create_pool` helper. Every worker gets its own
//! pool, sized to exactly one connection, so that "the pool" and "the
//! worker's one connection" are the same purgeable object.

use deadpool::managed::{Manager, Metrics, RecycleResult};
use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::errors::{Error, Result};

pub(crate) type TdsClient = Client<Compat<TcpStream>>;
pub(crate) type ConnectionPool = deadpool::managed::Pool<TdsManager>;
pub(crate) type PooledConnection = deadpool::managed::Object<TdsManager>;

pub(crate) struct TdsManager {
    config: tiberius::Config,
}

impl TdsManager {
    pub(crate) fn new(connection_string: &str, app_name: Option<&str>) -> Result<Self> {
        let mut config = tiberius::Config::from_ado_string(connection_string)
            .map_err(|_| Error::InvalidConnectionString(connection_string.to_owned()))?;
        if let Some(app_name) = app_name {
            config.application_name(app_name);
        }
        Ok(Self { config })
    }
}

impl Manager for TdsManager {
    type Type = TdsClient;
    type Error = Error;

    async fn create(&self) -> Result<Self::Type> {
        log::trace!("opening new connection");
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(self.config.clone(), tcp.compat_write()).await?;
        Ok(client)
    }

    async fn recycle(&self, client: &mut Self::Type, _metrics: &Metrics) -> RecycleResult<Self::Error> {
        log::trace!("checking connection liveness before reuse");
        client.simple_query("SELECT 1").await.map_err(Error::from)?;
        Ok(())
    }
}

/// Builds a one-worker pool: `max_size(1)` so a worker's pool never holds
/// more than the single connection it's entitled to.
pub(crate) fn create_pool(connection_string: &str, app_name: Option<&str>) -> Result<ConnectionPool> {
    let manager = TdsManager::new(connection_string, app_name)?;
    ConnectionPool::builder(manager)
        .max_size(1)
        .build()
        .map_err(|e| Error::Pool(e.to_string()))
}
