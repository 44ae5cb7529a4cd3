//! Services plugins use to observe and change the logical connection

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::{ConnectRequest, Operation, OperationResult, Terminal};
use crate::core::connection::{ConnectionRef, PhysicalConnection};
use crate::core::{HostSpec, Properties, Topology};
use crate::error::{SwitchyardError, SwitchyardResult};
use crate::pool::ConnectionProviderManager;
use crate::sql;
use crate::telemetry::TelemetryFactory;

/// What a plugin can see and change about its logical connection
#[async_trait]
pub trait PluginService: Send + Sync {
    fn current_connection(&self) -> Option<ConnectionRef>;

    fn current_host_spec(&self) -> Option<HostSpec>;

    /// Make `conn` the connection every following operation runs on
    fn set_current_connection(&self, conn: ConnectionRef, host: HostSpec);

    /// Latest known topology
    fn hosts(&self) -> Vec<HostSpec>;

    fn is_in_transaction(&self) -> bool;

    /// Open a new physical connection to `host`
    async fn connect(&self, host: &HostSpec, props: &Properties) -> SwitchyardResult<ConnectionRef>;

    /// Resolve the concrete node behind `conn`, if it can be determined
    async fn identify_connection(&self, conn: &ConnectionRef)
        -> SwitchyardResult<Option<HostSpec>>;

    /// Whether `identify_connection` can ever resolve a node
    fn can_identify_connections(&self) -> bool;

    fn telemetry(&self) -> Arc<dyn TelemetryFactory>;
}

/// Receives the concrete node of an ambiguous initial connection
pub trait HostListProviderService: Send + Sync {
    fn set_initial_connection_host_spec(&self, host: HostSpec);

    fn initial_connection_host_spec(&self) -> Option<HostSpec>;
}

/// Topology source
#[async_trait]
pub trait HostListProvider: Send + Sync {
    fn topology(&self) -> Topology;

    async fn identify_connection(&self, conn: &ConnectionRef)
        -> SwitchyardResult<Option<HostSpec>>;

    fn can_identify(&self) -> bool {
        true
    }
}

/// Host list supplied by the caller and replaced on refresh.
///
/// With an identity query configured, connections are identified by running
/// the query and matching the first column against the first DNS label of
/// each known host.
#[derive(Debug, Default)]
pub struct StaticHostListProvider {
    topology: RwLock<Topology>,
    identity_query: Option<String>,
}

impl StaticHostListProvider {
    pub fn new(topology: impl Into<Topology>) -> Self {
        Self {
            topology: RwLock::new(topology.into()),
            identity_query: None,
        }
    }

    pub fn with_identity_query(mut self, query: impl Into<String>) -> Self {
        self.identity_query = Some(query.into());
        self
    }

    /// Replace the topology with a fresh one
    pub fn update(&self, topology: impl Into<Topology>) {
        *self.topology.write() = topology.into();
    }

    fn find_host(&self, instance_id: &str) -> Option<HostSpec> {
        let instance_id = instance_id.trim();
        self.topology
            .read()
            .hosts()
            .iter()
            .find(|host| {
                let label = host.host().split('.').next().unwrap_or_default();
                label.eq_ignore_ascii_case(instance_id)
                    || host.host().eq_ignore_ascii_case(instance_id)
            })
            .cloned()
    }
}

#[async_trait]
impl HostListProvider for StaticHostListProvider {
    fn topology(&self) -> Topology {
        self.topology.read().clone()
    }

    fn can_identify(&self) -> bool {
        self.identity_query.is_some()
    }

    async fn identify_connection(
        &self,
        conn: &ConnectionRef,
    ) -> SwitchyardResult<Option<HostSpec>> {
        let Some(query) = &self.identity_query else {
            return Ok(None);
        };

        let rows = conn
            .invoke(&Operation::execute_query(query.as_str()))
            .await?
            .into_rows()?;

        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(|id| self.find_host(id)))
    }
}

struct ServiceState {
    current: Option<(ConnectionRef, HostSpec)>,
    in_transaction: bool,
    autocommit: bool,
    initial_host: Option<HostSpec>,
}

/// Plugin service of one logical connection.
///
/// Also the pipeline's terminal: operations run on the current connection
/// and successful ones update the transaction state.
pub struct DefaultPluginService {
    protocol: String,
    host_list: Arc<dyn HostListProvider>,
    providers: Arc<ConnectionProviderManager>,
    telemetry: Arc<dyn TelemetryFactory>,
    state: Mutex<ServiceState>,
}

impl DefaultPluginService {
    pub fn new(
        protocol: impl Into<String>,
        host_list: Arc<dyn HostListProvider>,
        providers: Arc<ConnectionProviderManager>,
        telemetry: Arc<dyn TelemetryFactory>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host_list,
            providers,
            telemetry,
            state: Mutex::new(ServiceState {
                current: None,
                in_transaction: false,
                autocommit: true,
                initial_host: None,
            }),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn is_autocommit(&self) -> bool {
        self.state.lock().autocommit
    }

    fn set_autocommit(state: &mut ServiceState, autocommit: bool) {
        // Re-enabling autocommit commits the open transaction
        if autocommit && !state.autocommit {
            state.in_transaction = false;
        }
        state.autocommit = autocommit;
    }

    /// Update transaction tracking after `op` succeeded
    fn track_transaction(&self, op: &Operation) {
        let mut state = self.state.lock();
        match op {
            Operation::SetAutoCommit(autocommit) => Self::set_autocommit(&mut state, *autocommit),
            Operation::Close => state.in_transaction = false,
            _ if sql::closes_transaction(op) => state.in_transaction = false,
            _ => {
                let Some(statement) = op.sql() else {
                    return;
                };

                if sql::sets_autocommit(statement) {
                    if let Some(autocommit) = sql::extract_autocommit_value(statement) {
                        Self::set_autocommit(&mut state, autocommit);
                    }
                } else if sql::opens_transaction(statement, state.autocommit) {
                    state.in_transaction = true;
                }
            }
        }
    }
}

#[async_trait]
impl PluginService for DefaultPluginService {
    fn current_connection(&self) -> Option<ConnectionRef> {
        self.state.lock().current.as_ref().map(|(conn, _)| Arc::clone(conn))
    }

    fn current_host_spec(&self) -> Option<HostSpec> {
        self.state.lock().current.as_ref().map(|(_, host)| host.clone())
    }

    fn set_current_connection(&self, conn: ConnectionRef, host: HostSpec) {
        tracing::debug!("Current connection set to {}", host);
        self.state.lock().current = Some((conn, host));
    }

    fn hosts(&self) -> Vec<HostSpec> {
        self.host_list.topology().hosts().to_vec()
    }

    fn is_in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    async fn connect(&self, host: &HostSpec, props: &Properties) -> SwitchyardResult<ConnectionRef> {
        self.providers.connect(&self.protocol, host, props).await
    }

    async fn identify_connection(
        &self,
        conn: &ConnectionRef,
    ) -> SwitchyardResult<Option<HostSpec>> {
        self.host_list.identify_connection(conn).await
    }

    fn can_identify_connections(&self) -> bool {
        self.host_list.can_identify()
    }

    fn telemetry(&self) -> Arc<dyn TelemetryFactory> {
        Arc::clone(&self.telemetry)
    }
}

impl HostListProviderService for DefaultPluginService {
    fn set_initial_connection_host_spec(&self, host: HostSpec) {
        tracing::debug!("Initial connection resolved to {}", host);
        self.state.lock().initial_host = Some(host);
    }

    fn initial_connection_host_spec(&self) -> Option<HostSpec> {
        self.state.lock().initial_host.clone()
    }
}

#[async_trait]
impl Terminal for DefaultPluginService {
    async fn connect(&self, request: &ConnectRequest) -> SwitchyardResult<ConnectionRef> {
        self.providers
            .connect(&request.protocol, &request.host, &request.props)
            .await
    }

    async fn execute(&self, op: &Operation) -> SwitchyardResult<OperationResult> {
        let conn = self
            .current_connection()
            .ok_or_else(|| SwitchyardError::connection_unavailable("no current connection"))?;

        let outcome = match op {
            Operation::Close => conn.close().await.map(|_| OperationResult::Done),
            _ => conn.invoke(op).await,
        };

        match outcome {
            Ok(result) => {
                self.track_transaction(op);
                Ok(result)
            }
            Err(e) => {
                // The open transaction did not survive the writer change
                if e.is_failover() {
                    self.state.lock().in_transaction = false;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DriverConnectionProvider;
    use crate::telemetry::NullTelemetryFactory;
    use crate::test_support::{MockConnection, MockDriver};

    fn service() -> DefaultPluginService {
        let driver = MockDriver::new();
        let providers = Arc::new(ConnectionProviderManager::new(Arc::new(
            DriverConnectionProvider::new(driver),
        )));
        let host_list = Arc::new(StaticHostListProvider::new(vec![
            HostSpec::writer("instance-0", 5432),
            HostSpec::reader("instance-1", 5432),
        ]));
        DefaultPluginService::new("mock", host_list, providers, Arc::new(NullTelemetryFactory))
    }

    fn with_current(service: &DefaultPluginService) -> Arc<MockConnection> {
        let conn = MockConnection::new("instance-0");
        service.set_current_connection(conn.clone(), HostSpec::writer("instance-0", 5432));
        conn
    }

    #[tokio::test]
    async fn test_execute_without_connection_fails() {
        let service = service();
        let result = Terminal::execute(&service, &Operation::Commit).await;
        assert!(matches!(result, Err(SwitchyardError::ConnectionUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_explicit_transaction_tracking() {
        let service = service();
        with_current(&service);

        Terminal::execute(&service, &Operation::execute("BEGIN")).await.unwrap();
        assert!(service.is_in_transaction());

        Terminal::execute(&service, &Operation::execute_update("insert into t values (1)"))
            .await
            .unwrap();
        assert!(service.is_in_transaction());

        Terminal::execute(&service, &Operation::Commit).await.unwrap();
        assert!(!service.is_in_transaction());

        Terminal::execute(&service, &Operation::execute("start transaction")).await.unwrap();
        Terminal::execute(&service, &Operation::execute("rollback")).await.unwrap();
        assert!(!service.is_in_transaction());
    }

    #[tokio::test]
    async fn test_autocommit_tracking() {
        let service = service();
        with_current(&service);

        Terminal::execute(&service, &Operation::execute_update("insert into t values (1)"))
            .await
            .unwrap();
        assert!(!service.is_in_transaction());

        Terminal::execute(&service, &Operation::SetAutoCommit(false)).await.unwrap();
        assert!(!service.is_autocommit());
        Terminal::execute(&service, &Operation::execute_update("insert into t values (1)"))
            .await
            .unwrap();
        assert!(service.is_in_transaction());

        // Turning autocommit back on commits
        Terminal::execute(&service, &Operation::execute("SET AUTOCOMMIT = 1")).await.unwrap();
        assert!(service.is_autocommit());
        assert!(!service.is_in_transaction());

        // Unknown values change nothing
        Terminal::execute(&service, &Operation::execute("SET AUTOCOMMIT = 2")).await.unwrap();
        assert!(service.is_autocommit());
    }

    #[tokio::test]
    async fn test_failed_operation_keeps_state() {
        let service = service();
        let conn = with_current(&service);

        conn.fail_next_with_failover();
        assert!(Terminal::execute(&service, &Operation::execute("BEGIN")).await.is_err());
        assert!(!service.is_in_transaction());
    }

    #[tokio::test]
    async fn test_failover_ends_open_transaction() {
        let service = service();
        let conn = with_current(&service);

        Terminal::execute(&service, &Operation::execute("BEGIN")).await.unwrap();
        assert!(service.is_in_transaction());

        conn.fail_next_with_failover();
        let error = Terminal::execute(&service, &Operation::execute_update("update t set a = 1"))
            .await
            .unwrap_err();
        assert!(error.is_failover());
        assert!(!service.is_in_transaction());
    }

    #[tokio::test]
    async fn test_close_closes_current_connection() {
        let service = service();
        let conn = with_current(&service);

        Terminal::execute(&service, &Operation::Close).await.unwrap();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_hosts_and_initial_host() {
        let service = service();
        assert_eq!(service.hosts().len(), 2);
        assert_eq!(service.initial_connection_host_spec(), None);

        service.set_initial_connection_host_spec(HostSpec::writer("instance-0", 5432));
        assert_eq!(
            service.initial_connection_host_spec(),
            Some(HostSpec::writer("instance-0", 5432))
        );
    }

    #[tokio::test]
    async fn test_static_provider_identifies_connection() {
        let provider = StaticHostListProvider::new(vec![
            HostSpec::writer("instance-0.xyz.us-east-2.rds.amazonaws.com", 5432),
            HostSpec::reader("instance-1.xyz.us-east-2.rds.amazonaws.com", 5432),
        ])
        .with_identity_query("select instance_id()");

        let conn = MockConnection::new("10.0.0.1");
        conn.set_rows(vec![vec!["instance-1".to_string()]]);
        let conn: ConnectionRef = conn;

        let host = provider.identify_connection(&conn).await.unwrap();
        assert_eq!(
            host.map(|h| h.host().to_string()).as_deref(),
            Some("instance-1.xyz.us-east-2.rds.amazonaws.com")
        );

        provider.update(vec![HostSpec::writer("instance-9", 5432)]);
        assert_eq!(provider.identify_connection(&conn).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_provider_without_query() {
        let provider = StaticHostListProvider::new(vec![HostSpec::writer("instance-0", 5432)]);
        let conn: ConnectionRef = MockConnection::new("instance-0");
        assert_eq!(provider.identify_connection(&conn).await.unwrap(), None);
    }
}
