//! Read/write splitting
//!
//! One logical connection, up to two physical ones: a cached writer and a
//! cached reader. `SetReadOnly` switches the current connection between them
//! lazily, reusing whichever is still open. Switching while a transaction is
//! open is refused. When no reader can be reached the writer doubles as the
//! reader.

pub mod selector;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SplittingSettings;
use crate::core::connection::{is_open, same_connection, ConnectionRef, PhysicalConnection};
use crate::core::{HostSpec, Properties};
use crate::error::{SwitchyardError, SwitchyardResult};
use crate::plugin::{
    ConnectRequest, ConnectionPlugin, HostListProviderService, Next, Operation, OperationResult,
    PluginService,
};
use crate::telemetry::TelemetryCounter;
use crate::utils::{identify_url_type, UrlType};

pub use selector::{selector_for, HostSelector, RandomHostSelector, RoundRobinHostSelector};

/// Cached physical connection and the host it points at
type Slot = Option<(ConnectionRef, HostSpec)>;

pub struct ReadWriteSplittingPlugin {
    service: Arc<dyn PluginService>,
    host_list_service: Arc<dyn HostListProviderService>,
    props: Properties,
    selector: Arc<dyn HostSelector>,
    load_balance_readers: bool,
    writer: Slot,
    reader: Slot,
    /// Current connection at the time of a failover; never re-adopted
    stale: Option<ConnectionRef>,
    explicitly_read_only: bool,
    switches: Arc<dyn TelemetryCounter>,
    reader_fallbacks: Arc<dyn TelemetryCounter>,
}

impl ReadWriteSplittingPlugin {
    pub fn new(
        service: Arc<dyn PluginService>,
        host_list_service: Arc<dyn HostListProviderService>,
        props: Properties,
    ) -> Self {
        let telemetry = service.telemetry();
        Self {
            switches: telemetry.create_counter("read_write_splitting.switches"),
            reader_fallbacks: telemetry.create_counter("read_write_splitting.reader_fallbacks"),
            service,
            host_list_service,
            props,
            selector: Arc::new(RandomHostSelector),
            load_balance_readers: false,
            writer: None,
            reader: None,
            stale: None,
            explicitly_read_only: false,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn HostSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Re-pick a reader before every statement run in read-only mode
    pub fn with_load_balancing(mut self, enabled: bool) -> Self {
        self.load_balance_readers = enabled;
        self
    }

    pub fn with_settings(self, settings: &SplittingSettings) -> Self {
        self.with_selector(selector_for(settings.reader_selection))
            .with_load_balancing(settings.load_balance_readers)
    }

    pub fn writer_connection(&self) -> Option<ConnectionRef> {
        self.writer.as_ref().map(|(conn, _)| Arc::clone(conn))
    }

    pub fn reader_connection(&self) -> Option<ConnectionRef> {
        self.reader.as_ref().map(|(conn, _)| Arc::clone(conn))
    }

    pub fn is_explicitly_read_only(&self) -> bool {
        self.explicitly_read_only
    }

    /// Make the current connection match the requested mode.
    ///
    /// Fails with a transaction safety violation when a transaction is open
    /// and the current connection would change.
    pub async fn switch_connection_if_required(&mut self, read_only: bool) -> SwitchyardResult<()> {
        let context = self
            .service
            .telemetry()
            .open_context("read_write_splitting.switch");
        context.set_attribute("read_only", if read_only { "true" } else { "false" });

        let result = if read_only {
            self.switch_to_reader().await
        } else {
            self.switch_to_writer().await
        };
        if result.is_ok() {
            self.release_stale().await;
        }

        match &result {
            Ok(()) => context.set_success(true),
            Err(e) => context.set_error(&e.to_string()),
        }
        context.close();
        result
    }

    /// Open current connection and its host, unless a failover made it stale
    fn current(&self) -> Option<(ConnectionRef, HostSpec)> {
        let conn = self.service.current_connection()?;
        if conn.is_closed() || self.is_stale(&conn) {
            return None;
        }
        let host = self.service.current_host_spec()?;
        Some((conn, host))
    }

    fn is_stale(&self, conn: &ConnectionRef) -> bool {
        self.stale
            .as_ref()
            .map(|stale| same_connection(stale, conn))
            .unwrap_or(false)
    }

    fn current_is_stale(&self) -> bool {
        self.service
            .current_connection()
            .map(|conn| self.is_stale(&conn))
            .unwrap_or(false)
    }

    /// Close the stale connection once something else is current
    async fn release_stale(&mut self) {
        if self.current_is_stale() {
            return;
        }
        if let Some(stale) = self.stale.take() {
            tracing::debug!("Closing connection left behind by failover");
            close_quietly(&stale).await;
        }
    }

    fn is_cached(slot: &Slot, conn: &ConnectionRef) -> bool {
        slot.as_ref()
            .map(|(cached, _)| same_connection(cached, conn))
            .unwrap_or(false)
    }

    fn is_live(slot: &Slot) -> bool {
        is_open(slot.as_ref().map(|(conn, _)| conn))
    }

    fn is_on_reader(&self, conn: &ConnectionRef, host: &HostSpec) -> bool {
        Self::is_cached(&self.reader, conn) || host.is_reader()
    }

    fn is_on_writer(&self, conn: &ConnectionRef, host: &HostSpec) -> bool {
        Self::is_cached(&self.writer, conn)
            || (host.is_writer() && !Self::is_cached(&self.reader, conn))
    }

    /// Cache the current connection under its role if that slot is empty
    fn remember_current(&mut self, conn: &ConnectionRef, host: &HostSpec) {
        if host.is_writer() {
            if !Self::is_live(&self.writer) {
                self.writer = Some((Arc::clone(conn), host.clone()));
            }
        } else if !Self::is_live(&self.reader) {
            self.reader = Some((Arc::clone(conn), host.clone()));
        }
    }

    fn ensure_no_transaction(&self, target: &str) -> SwitchyardResult<()> {
        if self.service.is_in_transaction() {
            return Err(SwitchyardError::transaction_safety(format!(
                "cannot switch to the {} connection while a transaction is open",
                target
            )));
        }
        Ok(())
    }

    fn make_current(&self, conn: &ConnectionRef, host: &HostSpec) {
        if let Some((current, _)) = self.current() {
            if same_connection(&current, conn) {
                return;
            }
        }
        self.service.set_current_connection(Arc::clone(conn), host.clone());
        self.switches.inc();
    }

    async fn switch_to_reader(&mut self) -> SwitchyardResult<()> {
        let current = self.current();
        if let Some((conn, host)) = &current {
            self.remember_current(conn, host);
            if self.is_on_reader(conn, host) {
                return Ok(());
            }
        }

        let single_host = self.service.hosts().len() == 1;
        if single_host {
            if let Some((conn, host)) = &current {
                if self.is_on_writer(conn, host) {
                    self.reader = self.writer.clone();
                    return Ok(());
                }
            }
        }

        self.ensure_no_transaction("reader")?;

        if single_host {
            let (conn, host) = self.ensure_writer().await?;
            self.reader = Some((Arc::clone(&conn), host.clone()));
            self.make_current(&conn, &host);
            return Ok(());
        }

        if let Some((conn, host)) = self.reader.clone().filter(|(conn, _)| !conn.is_closed()) {
            tracing::debug!("Reusing reader connection to {}", host);
            self.make_current(&conn, &host);
            return Ok(());
        }

        if let Some((conn, host)) = self.connect_to_reader().await {
            tracing::debug!("Switched to reader {}", host);
            self.reader = Some((Arc::clone(&conn), host.clone()));
            self.make_current(&conn, &host);
            return Ok(());
        }

        let (conn, host) = self.ensure_writer().await?;
        tracing::warn!("No reader available, falling back to writer {}", host);
        self.reader_fallbacks.inc();
        self.reader = Some((Arc::clone(&conn), host.clone()));
        self.make_current(&conn, &host);
        Ok(())
    }

    async fn switch_to_writer(&mut self) -> SwitchyardResult<()> {
        if let Some((conn, host)) = self.current() {
            self.remember_current(&conn, &host);
            if self.is_on_writer(&conn, &host) {
                return Ok(());
            }
        }

        self.ensure_no_transaction("writer")?;

        let (conn, host) = self.ensure_writer().await?;
        tracing::debug!("Switched to writer {}", host);
        self.make_current(&conn, &host);
        Ok(())
    }

    /// Live writer connection, opened if needed
    async fn ensure_writer(&mut self) -> SwitchyardResult<(ConnectionRef, HostSpec)> {
        if let Some(writer) = self.writer.clone().filter(|(conn, _)| !conn.is_closed()) {
            return Ok(writer);
        }

        if let Some((conn, host)) = self.current() {
            if host.is_writer() {
                self.writer = Some((Arc::clone(&conn), host.clone()));
                return Ok((conn, host));
            }
        }

        let host = self
            .service
            .hosts()
            .into_iter()
            .find(HostSpec::is_writer)
            .ok_or_else(|| SwitchyardError::connection_unavailable("no writer host in topology"))?;

        match self.service.connect(&host, &self.props).await {
            Ok(conn) => {
                self.writer = Some((Arc::clone(&conn), host.clone()));
                Ok((conn, host))
            }
            Err(e) => Err(SwitchyardError::connection_unavailable(format!(
                "unable to connect to writer {}: {}",
                host, e
            ))),
        }
    }

    /// Try untried readers in selector order until one connects
    async fn connect_to_reader(&mut self) -> Option<(ConnectionRef, HostSpec)> {
        let mut candidates: Vec<HostSpec> = self
            .service
            .hosts()
            .into_iter()
            .filter(HostSpec::is_reader)
            .collect();

        while let Some(index) = self.selector.select(&candidates) {
            if index >= candidates.len() {
                break;
            }
            let host = candidates.remove(index);
            match self.service.connect(&host, &self.props).await {
                Ok(conn) => return Some((conn, host)),
                Err(e) => tracing::warn!("Failed to connect to reader {}: {}", host, e),
            }
        }
        None
    }

    /// Move to a freshly selected reader; failures keep the current one
    async fn rotate_reader(&mut self) {
        let readers: Vec<HostSpec> = self
            .service
            .hosts()
            .into_iter()
            .filter(HostSpec::is_reader)
            .collect();
        if readers.len() < 2 {
            return;
        }

        let Some(host) = self
            .selector
            .select(&readers)
            .and_then(|index| readers.get(index))
            .cloned()
        else {
            return;
        };

        if let Some((conn, current_host)) = &self.reader {
            if *current_host == host && !conn.is_closed() {
                return;
            }
        }

        match self.service.connect(&host, &self.props).await {
            Ok(conn) => {
                tracing::debug!("Load balancing to reader {}", host);
                let previous = self.reader.replace((Arc::clone(&conn), host.clone()));
                self.make_current(&conn, &host);
                if let Some((old, _)) = previous {
                    if !Self::is_cached(&self.writer, &old) {
                        close_quietly(&old).await;
                    }
                }
            }
            Err(e) => tracing::warn!("Keeping current reader, failed to connect to {}: {}", host, e),
        }
    }

    /// Close cached connections other than the current one and forget both slots
    async fn discard_cached_connections(&mut self) {
        let current = self.service.current_connection();
        let writer = self.writer.take();
        let reader = self.reader.take();

        let mut closed: Vec<ConnectionRef> = Vec::new();
        for (conn, host) in writer.into_iter().chain(reader) {
            let is_current = current
                .as_ref()
                .map(|c| same_connection(c, &conn))
                .unwrap_or(false);
            if is_current || closed.iter().any(|c| same_connection(c, &conn)) {
                continue;
            }
            tracing::debug!("Closing cached connection to {}", host);
            close_quietly(&conn).await;
            closed.push(conn);
        }
    }

    async fn forward(
        &mut self,
        op: &Operation,
        next: Next<'_>,
    ) -> SwitchyardResult<OperationResult> {
        match next.execute(op).await {
            Err(e) if e.is_failover() => {
                tracing::warn!("Failover during {}, discarding cached connections", op.name());
                self.discard_cached_connections().await;
                self.stale = self.service.current_connection();
                Err(e)
            }
            other => other,
        }
    }

    async fn identify_initial_connection(
        &self,
        request: &ConnectRequest,
        conn: &ConnectionRef,
    ) -> SwitchyardResult<()> {
        match self.service.identify_connection(conn).await {
            Ok(Some(host)) => {
                self.host_list_service.set_initial_connection_host_spec(host);
                Ok(())
            }
            Ok(None) => Err(SwitchyardError::connection_unavailable(format!(
                "unable to identify the node behind {}",
                request.host
            ))),
            Err(e) => Err(e),
        }
    }
}

async fn close_quietly(conn: &ConnectionRef) {
    if let Err(e) = conn.close().await {
        tracing::debug!("Ignoring error while closing connection: {}", e);
    }
}

#[async_trait]
impl ConnectionPlugin for ReadWriteSplittingPlugin {
    fn name(&self) -> &'static str {
        "read_write_splitting"
    }

    async fn connect(
        &mut self,
        request: &ConnectRequest,
        next: Next<'_>,
    ) -> SwitchyardResult<ConnectionRef> {
        let conn = next.connect(request).await?;

        // Cluster endpoints stay unresolved when the topology source cannot
        // identify nodes; a bare IP always has to be resolved
        let needs_identity = request.initial
            && self.service.current_connection().is_none()
            && match identify_url_type(request.host.host()) {
                UrlType::IpAddress => true,
                url_type => {
                    url_type.needs_identification() && self.service.can_identify_connections()
                }
            };
        if !needs_identity {
            return Ok(conn);
        }

        if let Err(e) = self.identify_initial_connection(request, &conn).await {
            close_quietly(&conn).await;
            return Err(e);
        }
        Ok(conn)
    }

    async fn execute(
        &mut self,
        op: &Operation,
        next: Next<'_>,
    ) -> SwitchyardResult<OperationResult> {
        match op {
            Operation::SetReadOnly(read_only) => {
                self.switch_connection_if_required(*read_only).await?;
                self.explicitly_read_only = *read_only;
                self.forward(op, next).await
            }
            Operation::Close => {
                let result = next.execute(op).await;
                self.discard_cached_connections().await;
                self.stale = None;
                self.explicitly_read_only = false;
                result
            }
            _ => {
                if self.current_is_stale() {
                    tracing::debug!("Re-resolving connection after failover");
                    self.switch_connection_if_required(self.explicitly_read_only)
                        .await?;
                }
                if self.load_balance_readers
                    && self.explicitly_read_only
                    && op.is_execute()
                    && !self.service.is_in_transaction()
                {
                    self.rotate_reader().await;
                }
                self.forward(op, next).await
            }
        }
    }
}
