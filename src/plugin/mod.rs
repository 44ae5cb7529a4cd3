//! Interception pipeline
//!
//! Plugins run in registration order on the way in and unwind in reverse on
//! the way out. Each hook gets a [`Next`] continuation; calling it forwards
//! the request to the remaining plugins and finally to the [`Terminal`],
//! which does the real work on the current physical connection. A hook may
//! post-process the result, translate the error, or short-circuit without
//! calling `next` at all.

pub mod operation;
pub mod service;

use async_trait::async_trait;

use crate::core::connection::ConnectionRef;
use crate::error::SwitchyardResult;

pub use operation::{ConnectRequest, Operation, OperationResult, Row};
pub use service::{
    DefaultPluginService, HostListProvider, HostListProviderService, PluginService,
    StaticHostListProvider,
};

/// Innermost stage of the pipeline
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> SwitchyardResult<ConnectionRef>;

    async fn execute(&self, op: &Operation) -> SwitchyardResult<OperationResult>;
}

/// A behavior wrapped around every logical operation.
///
/// Plugins are owned by one logical connection and are never called
/// concurrently, so hooks take `&mut self`.
#[async_trait]
pub trait ConnectionPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(
        &mut self,
        request: &ConnectRequest,
        next: Next<'_>,
    ) -> SwitchyardResult<ConnectionRef> {
        next.connect(request).await
    }

    async fn execute(
        &mut self,
        op: &Operation,
        next: Next<'_>,
    ) -> SwitchyardResult<OperationResult> {
        next.execute(op).await
    }
}

/// The rest of the chain after the current plugin
pub struct Next<'a> {
    plugins: &'a mut [Box<dyn ConnectionPlugin>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub fn new(plugins: &'a mut [Box<dyn ConnectionPlugin>], terminal: &'a dyn Terminal) -> Self {
        Self { plugins, terminal }
    }

    pub async fn connect(self, request: &ConnectRequest) -> SwitchyardResult<ConnectionRef> {
        match self.plugins.split_first_mut() {
            Some((plugin, rest)) => {
                plugin
                    .connect(request, Next::new(rest, self.terminal))
                    .await
            }
            None => self.terminal.connect(request).await,
        }
    }

    pub async fn execute(self, op: &Operation) -> SwitchyardResult<OperationResult> {
        match self.plugins.split_first_mut() {
            Some((plugin, rest)) => plugin.execute(op, Next::new(rest, self.terminal)).await,
            None => self.terminal.execute(op).await,
        }
    }
}

/// Ordered plugins of one logical connection
#[derive(Default)]
pub struct PluginChain {
    plugins: Vec<Box<dyn ConnectionPlugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Box<dyn ConnectionPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn push(&mut self, plugin: Box<dyn ConnectionPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub async fn connect(
        &mut self,
        request: &ConnectRequest,
        terminal: &dyn Terminal,
    ) -> SwitchyardResult<ConnectionRef> {
        Next::new(&mut self.plugins, terminal).connect(request).await
    }

    pub async fn execute(
        &mut self,
        op: &Operation,
        terminal: &dyn Terminal,
    ) -> SwitchyardResult<OperationResult> {
        Next::new(&mut self.plugins, terminal).execute(op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HostSpec;
    use crate::core::Properties;
    use crate::error::SwitchyardError;
    use crate::test_support::MockConnection;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingTerminal {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Terminal for RecordingTerminal {
        async fn connect(&self, request: &ConnectRequest) -> SwitchyardResult<ConnectionRef> {
            self.log.lock().push(format!("terminal:connect:{}", request.host.host()));
            Ok(MockConnection::new(request.host.host()))
        }

        async fn execute(&self, op: &Operation) -> SwitchyardResult<OperationResult> {
            self.log.lock().push(format!("terminal:{}", op.name()));
            match op {
                Operation::ExecuteUpdate { .. } => Ok(OperationResult::UpdateCount(1)),
                _ => Ok(OperationResult::Done),
            }
        }
    }

    struct Tracing {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ConnectionPlugin for Tracing {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &mut self,
            op: &Operation,
            next: Next<'_>,
        ) -> SwitchyardResult<OperationResult> {
            self.log.lock().push(format!("{}:in", self.name));
            let result = next.execute(op).await;
            self.log.lock().push(format!("{}:out", self.name));
            result
        }
    }

    /// Refuses commits without calling the rest of the chain
    struct NoCommit;

    #[async_trait]
    impl ConnectionPlugin for NoCommit {
        fn name(&self) -> &'static str {
            "no_commit"
        }

        async fn execute(
            &mut self,
            op: &Operation,
            next: Next<'_>,
        ) -> SwitchyardResult<OperationResult> {
            if *op == Operation::Commit {
                return Err(SwitchyardError::internal("commit refused"));
            }
            next.execute(op).await
        }
    }

    /// Doubles update counts on the way out
    struct Doubler;

    #[async_trait]
    impl ConnectionPlugin for Doubler {
        fn name(&self) -> &'static str {
            "doubler"
        }

        async fn execute(
            &mut self,
            op: &Operation,
            next: Next<'_>,
        ) -> SwitchyardResult<OperationResult> {
            match next.execute(op).await? {
                OperationResult::UpdateCount(n) => Ok(OperationResult::UpdateCount(n * 2)),
                other => Ok(other),
            }
        }
    }

    fn tracing_chain(log: &Arc<Mutex<Vec<String>>>) -> PluginChain {
        PluginChain::new(vec![
            Box::new(Tracing {
                name: "outer",
                log: Arc::clone(log),
            }),
            Box::new(Tracing {
                name: "inner",
                log: Arc::clone(log),
            }),
        ])
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_unwinds_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal = RecordingTerminal { log: Arc::clone(&log) };
        let mut chain = tracing_chain(&log);

        chain.execute(&Operation::Commit, &terminal).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["outer:in", "inner:in", "terminal:commit", "inner:out", "outer:out"]
        );
        assert_eq!(chain.names(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_empty_chain_calls_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal = RecordingTerminal { log: Arc::clone(&log) };
        let mut chain = PluginChain::default();

        let request = ConnectRequest::new(
            "mock",
            HostSpec::writer("instance-0", 5432),
            Properties::new(),
            true,
        );
        chain.connect(&request, &terminal).await.unwrap();
        assert_eq!(*log.lock(), vec!["terminal:connect:instance-0"]);
    }

    #[tokio::test]
    async fn test_plugin_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal = RecordingTerminal { log: Arc::clone(&log) };
        let mut chain = tracing_chain(&log);
        chain.push(Box::new(NoCommit));

        let result = chain.execute(&Operation::Commit, &terminal).await;
        assert!(result.is_err());
        // Outer plugins still unwind; the terminal never ran
        assert_eq!(
            *log.lock(),
            vec!["outer:in", "inner:in", "inner:out", "outer:out"]
        );

        assert!(chain.execute(&Operation::Rollback, &terminal).await.is_ok());
    }

    #[tokio::test]
    async fn test_plugin_can_transform_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal = RecordingTerminal { log };
        let mut chain = PluginChain::new(vec![Box::new(Doubler)]);

        let result = chain
            .execute(&Operation::execute_update("update t set a = 1"), &terminal)
            .await
            .unwrap();
        assert_eq!(result, OperationResult::UpdateCount(2));
    }
}
