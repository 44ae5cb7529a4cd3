//! Application-facing logical connection

use std::sync::Arc;

use crate::core::{HostSpec, Properties};
use crate::error::{SwitchyardError, SwitchyardResult};
use crate::plugin::{
    ConnectRequest, DefaultPluginService, HostListProviderService, Operation, OperationResult,
    PluginChain, PluginService, Row,
};

/// One logical connection. Every call runs through the plugin chain.
///
/// Not meant to be shared between tasks; methods take `&mut self`.
pub struct ConnectionWrapper {
    chain: PluginChain,
    service: Arc<DefaultPluginService>,
    host: HostSpec,
    props: Properties,
    read_only: bool,
    closed: bool,
}

impl ConnectionWrapper {
    /// Open the initial physical connection through the chain
    pub async fn open(
        service: Arc<DefaultPluginService>,
        mut chain: PluginChain,
        host: HostSpec,
        props: Properties,
    ) -> SwitchyardResult<Self> {
        let request = ConnectRequest::new(service.protocol(), host.clone(), props.clone(), true);
        let conn = chain.connect(&request, service.as_ref()).await?;

        let resolved = service
            .initial_connection_host_spec()
            .unwrap_or_else(|| host.clone());
        tracing::debug!("Opened logical connection to {} via {}", resolved, host);
        service.set_current_connection(conn, resolved);

        Ok(Self {
            chain,
            service,
            host,
            props,
            read_only: false,
            closed: false,
        })
    }

    async fn dispatch(&mut self, op: Operation) -> SwitchyardResult<OperationResult> {
        if self.closed {
            return Err(SwitchyardError::driver(
                "logical connection is closed",
                Some("08003"),
            ));
        }
        self.chain.execute(&op, self.service.as_ref()).await
    }

    pub async fn execute_query(&mut self, sql: impl Into<String>) -> SwitchyardResult<Vec<Row>> {
        self.dispatch(Operation::execute_query(sql))
            .await?
            .into_rows()
    }

    pub async fn execute_update(&mut self, sql: impl Into<String>) -> SwitchyardResult<u64> {
        self.dispatch(Operation::execute_update(sql))
            .await?
            .into_update_count()
    }

    pub async fn execute(&mut self, sql: impl Into<String>) -> SwitchyardResult<OperationResult> {
        self.dispatch(Operation::execute(sql)).await
    }

    pub async fn set_read_only(&mut self, read_only: bool) -> SwitchyardResult<()> {
        self.dispatch(Operation::SetReadOnly(read_only)).await?;
        self.read_only = read_only;
        Ok(())
    }

    pub async fn set_auto_commit(&mut self, autocommit: bool) -> SwitchyardResult<()> {
        self.dispatch(Operation::SetAutoCommit(autocommit)).await?;
        Ok(())
    }

    pub async fn commit(&mut self) -> SwitchyardResult<()> {
        self.dispatch(Operation::Commit).await?;
        Ok(())
    }

    pub async fn rollback(&mut self) -> SwitchyardResult<()> {
        self.dispatch(Operation::Rollback).await?;
        Ok(())
    }

    /// Close the logical connection; later calls are no-ops
    pub async fn close(&mut self) -> SwitchyardResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.dispatch(Operation::Close).await;
        self.closed = true;
        result.map(|_| ())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_in_transaction(&self) -> bool {
        self.service.is_in_transaction()
    }

    pub fn is_auto_commit(&self) -> bool {
        self.service.is_autocommit()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Host the logical connection was opened against
    pub fn host(&self) -> &HostSpec {
        &self.host
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    /// Node the current physical connection points at
    pub fn current_host(&self) -> Option<HostSpec> {
        self.service.current_host_spec()
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }
}
