//! Connection providers
//!
//! Providers turn a host into a physical connection. The pooled provider is
//! used for hosts that pin a single node; everything else goes straight to
//! the driver.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::{
    default_pool_mapping, HostPool, PoolConfig, PoolConfigurator, PoolMapping,
    RoleAwareConfigurator,
};
use crate::cache::{DisposalPolicy, SlidingExpirationCache};
use crate::core::connection::{ConnectionFactory, ConnectionRef, PhysicalConnection};
use crate::core::{HostSpec, Properties};
use crate::error::{SwitchyardError, SwitchyardResult};
use crate::utils::identify_url_type;

/// Default bound on validation attempts per connect
pub const DEFAULT_MAX_VALIDATION_RETRIES: usize = 10;

/// Source of physical connections
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this provider can serve `host`
    fn accepts(&self, protocol: &str, host: &HostSpec, props: &Properties) -> bool;

    async fn connect(
        &self,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> SwitchyardResult<ConnectionRef>;

    /// Close everything the provider holds on to
    async fn release_resources(&self) {}
}

/// Opens a fresh driver connection on every call
pub struct DriverConnectionProvider {
    factory: Arc<dyn ConnectionFactory>,
}

impl DriverConnectionProvider {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl ConnectionProvider for DriverConnectionProvider {
    fn name(&self) -> &'static str {
        "driver"
    }

    fn accepts(&self, _protocol: &str, _host: &HostSpec, _props: &Properties) -> bool {
        true
    }

    async fn connect(
        &self,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> SwitchyardResult<ConnectionRef> {
        self.factory.connect(protocol, host, props).await
    }
}

/// Cache of host pools shared by every pooled provider
pub type PoolCache = SlidingExpirationCache<String, Arc<HostPool>>;

/// Pools are disposed only once nothing is borrowed from them
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolDisposal;

#[async_trait]
impl DisposalPolicy<Arc<HostPool>> for PoolDisposal {
    fn should_dispose(&self, pool: &Arc<HostPool>) -> bool {
        pool.active_count() == 0
    }

    async fn dispose(&self, pool: Arc<HostPool>) -> SwitchyardResult<()> {
        pool.close().await
    }
}

impl PoolCache {
    /// Pool cache with the pool disposal policy
    pub fn for_pools(expiration: Duration, cleanup_interval: Duration) -> Self {
        SlidingExpirationCache::new(expiration, cleanup_interval, Arc::new(PoolDisposal))
    }
}

/// Hands out connections from per-host pools
pub struct PooledConnectionProvider {
    factory: Arc<dyn ConnectionFactory>,
    pools: Arc<PoolCache>,
    base_config: PoolConfig,
    configurator: Arc<dyn PoolConfigurator>,
    mapping: PoolMapping,
    max_retries: usize,
}

impl PooledConnectionProvider {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        pools: Arc<PoolCache>,
        base_config: PoolConfig,
    ) -> Self {
        Self {
            factory,
            pools,
            base_config,
            configurator: Arc::new(RoleAwareConfigurator),
            mapping: default_pool_mapping(),
            max_retries: DEFAULT_MAX_VALIDATION_RETRIES,
        }
    }

    pub fn with_configurator(mut self, configurator: Arc<dyn PoolConfigurator>) -> Self {
        self.configurator = configurator;
        self
    }

    pub fn with_mapping(mut self, mapping: PoolMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Number of pools currently cached
    pub fn host_count(&self) -> usize {
        self.pools.len()
    }

    /// Keys of the cached pools
    pub fn hosts(&self) -> BTreeSet<String> {
        self.pools.keys().into_iter().collect()
    }

    fn create_pool(
        &self,
        key: &str,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> SwitchyardResult<Arc<HostPool>> {
        let config = self
            .configurator
            .configure(host, props, self.base_config.clone());

        tracing::info!(
            "Creating connection pool {} (max_size: {}, read_only: {})",
            key,
            config.max_size,
            config.read_only
        );

        let pool = HostPool::new(
            key,
            protocol,
            host.clone(),
            props.clone(),
            config,
            Arc::clone(&self.factory),
        )?;
        Ok(Arc::new(pool))
    }
}

#[async_trait]
impl ConnectionProvider for PooledConnectionProvider {
    fn name(&self) -> &'static str {
        "pooled"
    }

    fn accepts(&self, _protocol: &str, host: &HostSpec, _props: &Properties) -> bool {
        identify_url_type(host.host()).is_instance()
    }

    async fn connect(
        &self,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> SwitchyardResult<ConnectionRef> {
        let key = (self.mapping)(host, props);
        // Underlying error seen while retrying, if any
        let mut cause = None;
        let mut invalid = 0;

        for attempt in 1..=self.max_retries {
            let pool = self
                .pools
                .compute_if_absent(key.clone(), |key| {
                    self.create_pool(key, protocol, host, props)
                })
                .await?;

            let conn = match pool.get().await {
                Ok(conn) => conn,
                // Swept between lookup and borrow; the next lookup builds a new pool
                Err(e) if pool.is_closed() => {
                    tracing::debug!("Pool {} closed while borrowing, retrying", key);
                    cause = Some(e);
                    continue;
                }
                // Replacing an invalid connection failed
                Err(e) if invalid > 0 => {
                    return Err(SwitchyardError::ValidationRetryExhausted {
                        attempts: invalid,
                        source: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            };

            if conn.is_valid(pool.config().validation_timeout).await {
                return Ok(conn);
            }

            tracing::warn!(
                "Connection from pool {} failed validation (attempt {}/{})",
                key,
                attempt,
                self.max_retries
            );
            conn.evict().await;
            invalid += 1;
        }

        Err(SwitchyardError::ValidationRetryExhausted {
            attempts: self.max_retries,
            source: Box::new(cause.unwrap_or_else(|| {
                SwitchyardError::connection_unavailable(format!(
                    "connections to {} kept failing validation",
                    host
                ))
            })),
        })
    }

    async fn release_resources(&self) {
        let count = self.pools.len();
        self.pools.clear().await;
        tracing::info!("Released {} connection pools", count);
    }
}

/// Chooses between the pooled and the direct driver provider
pub struct ConnectionProviderManager {
    default_provider: Arc<dyn ConnectionProvider>,
    pooled_provider: Option<Arc<dyn ConnectionProvider>>,
}

impl ConnectionProviderManager {
    pub fn new(default_provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            default_provider,
            pooled_provider: None,
        }
    }

    pub fn with_pooled_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.pooled_provider = Some(provider);
        self
    }

    /// Pooled provider when it accepts the host, the default one otherwise
    pub fn provider_for(
        &self,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> &Arc<dyn ConnectionProvider> {
        match &self.pooled_provider {
            Some(pooled) if pooled.accepts(protocol, host, props) => pooled,
            _ => &self.default_provider,
        }
    }

    pub async fn connect(
        &self,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> SwitchyardResult<ConnectionRef> {
        let provider = self.provider_for(protocol, host, props);
        tracing::debug!("Connecting to {} via {} provider", host, provider.name());
        provider.connect(protocol, host, props).await
    }

    pub async fn release_resources(&self) {
        if let Some(pooled) = &self.pooled_provider {
            pooled.release_resources().await;
        }
        self.default_provider.release_resources().await;
    }
}
