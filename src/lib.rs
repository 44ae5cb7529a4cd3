//! Switchyard - resilient connection routing for replicated database clusters
//!
//! One logical connection fronts a writer and a reader physical connection.
//! Every operation passes through a chain of plugins; the read/write splitting
//! plugin decides which physical connection is current, and pooled physical
//! connections live in a sliding-expiration cache owned by [`Switchyard`].
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod plugin;
pub mod pool;
pub mod splitting;
pub mod sql;
pub mod telemetry;
pub mod utils;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::BTreeSet;
use std::sync::Arc;

pub use crate::config::Config;
pub use crate::core::connection::{ConnectionFactory, ConnectionRef, PhysicalConnection};
pub use crate::core::{HostRole, HostSpec, Properties, Topology};
pub use crate::error::{ErrorClass, ErrorCode, SwitchyardError, SwitchyardResult};
pub use crate::plugin::{
    ConnectionPlugin, DefaultPluginService, HostListProvider, Operation, OperationResult,
    PluginChain, Row, StaticHostListProvider,
};
pub use crate::splitting::ReadWriteSplittingPlugin;
pub use crate::wrapper::ConnectionWrapper;

use crate::pool::{
    ConnectionProviderManager, DriverConnectionProvider, PoolCache, PoolConfig,
    PooledConnectionProvider,
};
use crate::telemetry::{factory_from_settings, TelemetryFactory};

/// Owns the state shared by every logical connection: the pool cache, the
/// provider manager and the telemetry factory.
pub struct Switchyard {
    config: Config,
    protocol: String,
    host_list: Arc<dyn HostListProvider>,
    pools: Arc<PoolCache>,
    pooled_provider: Arc<PooledConnectionProvider>,
    providers: Arc<ConnectionProviderManager>,
    telemetry: Arc<dyn TelemetryFactory>,
}

impl Switchyard {
    /// Build the routing core.
    ///
    /// Starts the pool sweeper when background cleanup is enabled and a tokio
    /// runtime is available.
    pub fn new(
        config: Config,
        protocol: impl Into<String>,
        driver: Arc<dyn ConnectionFactory>,
        host_list: Arc<dyn HostListProvider>,
    ) -> SwitchyardResult<Self> {
        config.validate()?;
        let telemetry = factory_from_settings(&config.telemetry)?;

        let pools = Arc::new(PoolCache::for_pools(
            config.cache.expiration(),
            config.cache.cleanup_interval(),
        ));
        let pooled_provider = Arc::new(
            PooledConnectionProvider::new(
                Arc::clone(&driver),
                Arc::clone(&pools),
                PoolConfig::from(&config.pool),
            )
            .with_max_retries(config.pool.max_validation_retries),
        );
        let providers = Arc::new(
            ConnectionProviderManager::new(Arc::new(DriverConnectionProvider::new(driver)))
                .with_pooled_provider(pooled_provider.clone()),
        );

        if config.cache.background_cleanup && !pools.start_cleanup_task() {
            tracing::warn!("Pool cleanup task not started, sweeping on access instead");
        }

        let protocol = protocol.into();
        tracing::info!(
            "Switchyard ready (protocol: {}, reader selection: {:?}, load balancing: {})",
            protocol,
            config.splitting.reader_selection,
            config.splitting.load_balance_readers
        );

        Ok(Self {
            config,
            protocol,
            host_list,
            pools,
            pooled_provider,
            providers,
            telemetry,
        })
    }

    /// Open a logical connection with the read/write splitting plugin installed.
    ///
    /// Connecting through an IP address requires the host list provider to
    /// identify the node behind the connection. Cluster and custom endpoints are
    /// identified only when the provider has an identity query; otherwise the
    /// endpoint's host spec is kept as the writer.
    pub async fn connect(
        &self,
        host: HostSpec,
        props: Properties,
    ) -> SwitchyardResult<ConnectionWrapper> {
        let service = Arc::new(DefaultPluginService::new(
            self.protocol.clone(),
            Arc::clone(&self.host_list),
            Arc::clone(&self.providers),
            Arc::clone(&self.telemetry),
        ));

        let splitting = ReadWriteSplittingPlugin::new(service.clone(), service.clone(), props.clone())
            .with_settings(&self.config.splitting);
        let chain = PluginChain::new(vec![Box::new(splitting)]);

        ConnectionWrapper::open(service, chain, host, props).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of per-host pools currently cached
    pub fn pool_count(&self) -> usize {
        self.pooled_provider.host_count()
    }

    /// Keys of the cached pools
    pub fn pooled_hosts(&self) -> BTreeSet<String> {
        self.pooled_provider.hosts()
    }

    /// Dispose pools that have been idle past the expiration
    pub async fn sweep_pools(&self) -> usize {
        self.pools.sweep().await
    }

    /// Stop the sweeper and close every pool
    pub async fn shutdown(&self) {
        self.pools.stop_cleanup_task().await;
        self.providers.release_resources().await;
        tracing::info!("Switchyard shut down");
    }
}
