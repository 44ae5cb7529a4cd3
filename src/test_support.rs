//! Scripted connections and driver for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::connection::{ConnectionFactory, ConnectionRef, PhysicalConnection};
use crate::core::{HostSpec, Properties};
use crate::error::{SwitchyardError, SwitchyardResult};
use crate::plugin::{Operation, OperationResult, Row};

/// In-memory connection that records every operation
pub(crate) struct MockConnection {
    name: String,
    closed: AtomicBool,
    valid: AtomicBool,
    fail_next: AtomicBool,
    rows: Mutex<Vec<Row>>,
    invocations: Mutex<Vec<Operation>>,
}

impl MockConnection {
    pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            closed: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            fail_next: AtomicBool::new(false),
            rows: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// The next operation fails with a failover error
    pub(crate) fn fail_next_with_failover(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Rows returned by every query
    pub(crate) fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock() = rows;
    }

    pub(crate) fn invocations(&self) -> Vec<Operation> {
        self.invocations.lock().clone()
    }

    /// Statements executed on this connection
    pub(crate) fn statements(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .filter_map(|op| op.sql().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl PhysicalConnection for MockConnection {
    async fn invoke(&self, op: &Operation) -> SwitchyardResult<OperationResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwitchyardError::driver(
                format!("connection {} is closed", self.name),
                Some("08003"),
            ));
        }

        self.invocations.lock().push(op.clone());
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SwitchyardError::failover(
                format!("writer behind {} changed", self.name),
                false,
            ));
        }

        Ok(match op {
            Operation::ExecuteQuery { .. } => OperationResult::Rows(self.rows.lock().clone()),
            Operation::ExecuteUpdate { .. } => OperationResult::UpdateCount(1),
            _ => OperationResult::Done,
        })
    }

    async fn is_valid(&self, _timeout: Duration) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.valid.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> SwitchyardResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct DriverScript {
    failing: HashSet<String>,
    fail_after: HashMap<String, usize>,
    invalid_remaining: HashMap<String, usize>,
    rows: HashMap<String, Vec<Row>>,
    attempts: HashMap<String, usize>,
    opened: Vec<Arc<MockConnection>>,
}

/// Connection factory with per-host failure scripting
#[derive(Default)]
pub(crate) struct MockDriver {
    script: Mutex<DriverScript>,
}

impl MockDriver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every connect to `host` fails until recovered
    pub(crate) fn fail_host(&self, host: &str) {
        self.script.lock().failing.insert(host.to_string());
    }

    pub(crate) fn recover_host(&self, host: &str) {
        let mut script = self.script.lock();
        script.failing.remove(host);
        script.fail_after.remove(host);
    }

    /// Connects to `host` succeed `successes` times, then fail
    pub(crate) fn fail_host_after(&self, host: &str, successes: usize) {
        self.script
            .lock()
            .fail_after
            .insert(host.to_string(), successes);
    }

    /// The next `count` connections to `host` fail validation
    pub(crate) fn invalidate_next(&self, host: &str, count: usize) {
        self.script
            .lock()
            .invalid_remaining
            .insert(host.to_string(), count);
    }

    /// Rows returned by queries on new connections to `host`
    pub(crate) fn set_rows(&self, host: &str, rows: Vec<Row>) {
        self.script.lock().rows.insert(host.to_string(), rows);
    }

    /// Connect attempts to `host`, failed ones included
    pub(crate) fn connect_count(&self, host: &str) -> usize {
        self.script.lock().attempts.get(host).copied().unwrap_or(0)
    }

    pub(crate) fn total_connects(&self) -> usize {
        self.script.lock().attempts.values().sum()
    }

    /// Connections opened to `host`, oldest first
    pub(crate) fn connections_to(&self, host: &str) -> Vec<Arc<MockConnection>> {
        self.script
            .lock()
            .opened
            .iter()
            .filter(|conn| conn.name() == host)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConnectionFactory for MockDriver {
    async fn connect(
        &self,
        _protocol: &str,
        host: &HostSpec,
        _props: &Properties,
    ) -> SwitchyardResult<ConnectionRef> {
        let mut script = self.script.lock();
        *script.attempts.entry(host.host().to_string()).or_insert(0) += 1;

        let exhausted = match script.fail_after.get_mut(host.host()) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        if exhausted || script.failing.contains(host.host()) {
            return Err(SwitchyardError::driver(
                format!("connection to {} refused", host.host()),
                Some("08001"),
            ));
        }

        let conn = MockConnection::new(host.host());
        if let Some(remaining) = script.invalid_remaining.get_mut(host.host()) {
            if *remaining > 0 {
                *remaining -= 1;
                conn.set_valid(false);
            }
        }
        if let Some(rows) = script.rows.get(host.host()) {
            conn.set_rows(rows.clone());
        }

        script.opened.push(Arc::clone(&conn));
        Ok(conn)
    }
}
