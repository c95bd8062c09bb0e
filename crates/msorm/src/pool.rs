//! Connection pool utilities.
//!
//! A [`deadpool`] manager over tiberius TDS clients. The default pool is
//! sized for a single in-flight logical session: one unit of work holds one
//! connection and one transaction at a time.

use deadpool::managed::{Manager, Metrics, Pool, RecycleError, RecycleResult};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::conn::DbConfig;
use crate::error::{OrmError, OrmResult};

/// A connected TDS client.
pub type TdsClient = tiberius::Client<Compat<TcpStream>>;

/// Pool of TDS clients.
pub type TdsPool = Pool<TdsManager>;

/// Deadpool manager that dials and recycles TDS connections.
#[derive(Debug)]
pub struct TdsManager {
    config: tiberius::Config,
    default_schema: Option<String>,
}

impl TdsManager {
    pub fn new(config: &DbConfig) -> Self {
        Self {
            config: config.to_driver_config(),
            default_schema: config.schema.clone(),
        }
    }

    /// The configured default schema, if any.
    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }
}

impl Manager for TdsManager {
    type Type = TdsClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> Result<TdsClient, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        tiberius::Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn recycle(&self, client: &mut TdsClient, _: &Metrics) -> RecycleResult<Self::Error> {
        let stream = client
            .simple_query("SELECT 1")
            .await
            .map_err(RecycleError::Backend)?;
        stream.into_results().await.map_err(RecycleError::Backend)?;
        Ok(())
    }
}

/// Create a pool sized for one logical session.
pub fn create_pool(config: &DbConfig) -> OrmResult<TdsPool> {
    create_pool_with_size(config, 1)
}

/// Create a pool with a custom maximum size.
pub fn create_pool_with_size(config: &DbConfig, max_size: usize) -> OrmResult<TdsPool> {
    Pool::builder(TdsManager::new(config))
        .max_size(max_size)
        .build()
        .map_err(|e| OrmError::Pool(e.to_string()))
}
