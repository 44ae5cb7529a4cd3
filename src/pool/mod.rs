//! Per-host connection pools
//!
//! A [`HostPool`] owns the physical connections to one pool key. Connections
//! are handed out as [`PooledConnection`]s whose `close` returns them to the
//! pool instead of closing the physical connection.

pub mod provider;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolSettings;
use crate::core::connection::{ConnectionFactory, ConnectionRef, PhysicalConnection};
use crate::core::{HostSpec, Properties};
use crate::error::{SwitchyardError, SwitchyardResult};
use crate::plugin::{Operation, OperationResult};

pub use provider::{
    ConnectionProvider, ConnectionProviderManager, DriverConnectionProvider, PoolCache,
    PoolDisposal, PooledConnectionProvider,
};

/// Settings of a single host pool
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Put every new connection into read-only mode
    pub read_only: bool,
    pub validation_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            read_only: false,
            validation_timeout: Duration::from_secs(3),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_size: settings.max_connections_per_host,
            read_only: false,
            validation_timeout: settings.validation_timeout(),
            acquire_timeout: settings.acquire_timeout(),
        }
    }
}

/// Adjusts the pool configuration for the host a pool is created for
pub trait PoolConfigurator: Send + Sync {
    fn configure(&self, host: &HostSpec, props: &Properties, config: PoolConfig) -> PoolConfig;
}

impl<F> PoolConfigurator for F
where
    F: Fn(&HostSpec, &Properties, PoolConfig) -> PoolConfig + Send + Sync,
{
    fn configure(&self, host: &HostSpec, props: &Properties, config: PoolConfig) -> PoolConfig {
        self(host, props, config)
    }
}

/// Default configurator: reader pools are read-only
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleAwareConfigurator;

impl PoolConfigurator for RoleAwareConfigurator {
    fn configure(&self, host: &HostSpec, _props: &Properties, mut config: PoolConfig) -> PoolConfig {
        config.read_only = host.is_reader();
        config
    }
}

/// Derives the pool key for a host
pub type PoolMapping = Arc<dyn Fn(&HostSpec, &Properties) -> String + Send + Sync>;

/// Keys pools by the host's canonical URL
pub fn default_pool_mapping() -> PoolMapping {
    Arc::new(|host: &HostSpec, _props: &Properties| host.url())
}

/// Connections to one pool key
pub struct HostPool {
    key: String,
    protocol: String,
    host: HostSpec,
    props: Properties,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<ConnectionRef>>,
    active: AtomicUsize,
    closed: AtomicBool,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for HostPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPool")
            .field("key", &self.key)
            .field("host", &self.host)
            .field("active", &self.active_count())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl HostPool {
    pub fn new(
        key: impl Into<String>,
        protocol: impl Into<String>,
        host: HostSpec,
        props: Properties,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> SwitchyardResult<Self> {
        if config.max_size == 0 {
            return Err(SwitchyardError::internal("pool max_size must be greater than 0"));
        }

        Ok(Self {
            key: key.into(),
            protocol: protocol.into(),
            host,
            props,
            permits: Arc::new(Semaphore::new(config.max_size)),
            config,
            factory,
            idle: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn host(&self) -> &HostSpec {
        &self.host
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connections currently handed out
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hand out an idle connection or open a new one.
    ///
    /// Waits up to the acquire timeout when the pool is exhausted.
    pub async fn get(self: &Arc<Self>) -> SwitchyardResult<Arc<PooledConnection>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => {
                return Err(SwitchyardError::timeout(format!(
                    "acquire connection from pool {}",
                    self.key
                )))
            }
        };

        let conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.open_connection().await?,
        };

        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(PooledConnection {
            inner: conn,
            pool: Arc::clone(self),
            permit: Mutex::new(Some(permit)),
            returned: AtomicBool::new(false),
        }))
    }

    fn take_idle(&self) -> Option<ConnectionRef> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop() {
            if !conn.is_closed() {
                return Some(conn);
            }
        }
        None
    }

    async fn open_connection(&self) -> SwitchyardResult<ConnectionRef> {
        let conn = self
            .factory
            .connect(&self.protocol, &self.host, &self.props)
            .await?;

        if self.config.read_only {
            if let Err(e) = conn.invoke(&Operation::SetReadOnly(true)).await {
                close_quietly(&conn).await;
                return Err(e);
            }
        }

        tracing::debug!("Opened pooled connection to {}", self.key);
        Ok(conn)
    }

    /// Put a connection back; returns it when it has to be closed instead
    fn return_connection(&self, conn: ConnectionRef) -> Option<ConnectionRef> {
        self.active.fetch_sub(1, Ordering::AcqRel);
        if conn.is_closed() {
            return None;
        }

        if self.is_closed() {
            return Some(conn);
        }

        self.idle.lock().push(conn);
        None
    }

    async fn release(&self, conn: ConnectionRef) {
        if let Some(conn) = self.return_connection(conn) {
            close_quietly(&conn).await;
        }
    }

    /// Drop a connection from the pool for good
    async fn evict(&self, conn: ConnectionRef) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!("Evicting connection from pool {}", self.key);
        close_quietly(&conn).await;
    }

    /// Close idle connections and refuse new requests.
    ///
    /// Connections still handed out are closed when they come back.
    pub async fn close(&self) -> SwitchyardResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.permits.close();

        let idle: Vec<ConnectionRef> = std::mem::take(&mut *self.idle.lock());
        let mut failures = 0;
        for conn in idle {
            if let Err(e) = conn.close().await {
                tracing::warn!("Failed to close idle connection in pool {}: {}", self.key, e);
                failures += 1;
            }
        }

        tracing::info!("Closed connection pool {}", self.key);
        if failures > 0 {
            return Err(SwitchyardError::disposal(format!(
                "{} idle connections in pool {} failed to close",
                failures, self.key
            )));
        }
        Ok(())
    }

    fn closed_error(&self) -> SwitchyardError {
        SwitchyardError::connection_unavailable(format!("pool {} is closed", self.key))
    }
}

async fn close_quietly(conn: &ConnectionRef) {
    if let Err(e) = conn.close().await {
        tracing::debug!("Ignoring error while closing connection: {}", e);
    }
}

/// A connection borrowed from a [`HostPool`]
pub struct PooledConnection {
    inner: ConnectionRef,
    pool: Arc<HostPool>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    returned: AtomicBool,
}

impl PooledConnection {
    pub fn pool_key(&self) -> &str {
        self.pool.key()
    }

    /// Close the physical connection and remove it from the pool
    pub async fn evict(&self) {
        if self.returned.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.evict(Arc::clone(&self.inner)).await;
        self.permit.lock().take();
    }

    fn returned_error(&self) -> SwitchyardError {
        SwitchyardError::driver(
            format!("connection from pool {} is closed", self.pool.key()),
            Some("08003"),
        )
    }
}

#[async_trait]
impl PhysicalConnection for PooledConnection {
    async fn invoke(&self, op: &Operation) -> SwitchyardResult<OperationResult> {
        if self.returned.load(Ordering::Acquire) {
            return Err(self.returned_error());
        }
        self.inner.invoke(op).await
    }

    async fn is_valid(&self, timeout: Duration) -> bool {
        if self.returned.load(Ordering::Acquire) {
            return false;
        }

        tokio::time::timeout(timeout, self.inner.is_valid(timeout))
            .await
            .unwrap_or(false)
    }

    fn is_closed(&self) -> bool {
        self.returned.load(Ordering::Acquire) || self.inner.is_closed()
    }

    /// Return the physical connection to its pool
    async fn close(&self) -> SwitchyardResult<()> {
        if self.returned.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.release(Arc::clone(&self.inner)).await;
        self.permit.lock().take();
        Ok(())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.returned.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(conn) = self.pool.return_connection(Arc::clone(&self.inner)) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { close_quietly(&conn).await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockDriver;

    fn pool_for(driver: &Arc<MockDriver>, host: HostSpec, config: PoolConfig) -> Arc<HostPool> {
        let key = host.url();
        let factory: Arc<dyn ConnectionFactory> = driver.clone();
        Arc::new(HostPool::new(key, "mock", host, Properties::new(), config, factory).unwrap())
    }

    #[tokio::test]
    async fn test_close_returns_connection_to_pool() {
        let driver = MockDriver::new();
        let pool = pool_for(&driver, HostSpec::writer("instance-0", 5432), PoolConfig::default());

        let conn = pool.get().await.unwrap();
        assert_eq!(pool.active_count(), 1);
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);

        // The idle connection is reused
        let again = pool.get().await.unwrap();
        assert_eq!(driver.connect_count("instance-0"), 1);
        again.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_returned_connection_rejects_operations() {
        let driver = MockDriver::new();
        let pool = pool_for(&driver, HostSpec::writer("instance-0", 5432), PoolConfig::default());

        let conn = pool.get().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.invoke(&Operation::Commit).await.is_err());
        assert!(!conn.is_valid(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_reader_pool_sets_read_only() {
        let driver = MockDriver::new();
        let host = HostSpec::reader("instance-1", 5432);
        let config = RoleAwareConfigurator.configure(&host, &Properties::new(), PoolConfig::default());
        assert!(config.read_only);

        let pool = pool_for(&driver, host, config);
        let conn = pool.get().await.unwrap();
        let physical = driver.connections_to("instance-1");
        assert_eq!(physical.len(), 1);
        assert_eq!(physical[0].invocations(), vec![Operation::SetReadOnly(true)]);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_evict_closes_physical_connection() {
        let driver = MockDriver::new();
        let pool = pool_for(&driver, HostSpec::writer("instance-0", 5432), PoolConfig::default());

        let conn = pool.get().await.unwrap();
        conn.evict().await;
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert!(driver.connections_to("instance-0")[0].is_closed());
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let driver = MockDriver::new();
        let config = PoolConfig {
            max_size: 1,
            acquire_timeout: Duration::from_millis(20),
            ..PoolConfig::default()
        };
        let pool = pool_for(&driver, HostSpec::writer("instance-0", 5432), config);

        let held = pool.get().await.unwrap();
        let result = pool.get().await;
        assert!(matches!(result, Err(SwitchyardError::Timeout { .. })));

        held.close().await.unwrap();
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_pool() {
        let driver = MockDriver::new();
        let pool = pool_for(&driver, HostSpec::writer("instance-0", 5432), PoolConfig::default());

        let idle = pool.get().await.unwrap();
        let busy = pool.get().await.unwrap();
        idle.close().await.unwrap();

        pool.close().await.unwrap();
        assert!(pool.is_closed());
        assert!(pool.get().await.is_err());

        let physical = driver.connections_to("instance-0");
        assert_eq!(physical.iter().filter(|c| c.is_closed()).count(), 1);

        // Connections handed out before the close are closed on return
        busy.close().await.unwrap();
        assert!(physical.iter().all(|c| c.is_closed()));
    }

    #[tokio::test]
    async fn test_dropped_connection_is_returned() {
        let driver = MockDriver::new();
        let pool = pool_for(&driver, HostSpec::writer("instance-0", 5432), PoolConfig::default());

        drop(pool.get().await.unwrap());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_zero_sized_pool_rejected() {
        let driver = MockDriver::new();
        let config = PoolConfig {
            max_size: 0,
            ..PoolConfig::default()
        };
        let factory: Arc<dyn ConnectionFactory> = driver;
        let result = HostPool::new(
            "k",
            "mock",
            HostSpec::writer("instance-0", 5432),
            Properties::new(),
            config,
            factory,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_pool_mapping() {
        let mapping = default_pool_mapping();
        let host = HostSpec::writer("instance-0", 5432);
        assert_eq!(mapping(&host, &Properties::new()), "instance-0:5432/");
    }
}
