//! Physical connection capability consumed from the database driver
//!
//! The routing core never inspects wire behavior. It only validates, closes
//! and forwards operations to whatever the driver hands back.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{HostSpec, Properties};
use crate::error::SwitchyardResult;
use crate::plugin::{Operation, OperationResult};

/// Shared handle to a physical connection
pub type ConnectionRef = Arc<dyn PhysicalConnection>;

/// An opaque connection to one database node
#[async_trait]
pub trait PhysicalConnection: Send + Sync {
    /// Forward an operation to the node
    async fn invoke(&self, op: &Operation) -> SwitchyardResult<OperationResult>;

    /// Liveness check bounded by `timeout`
    async fn is_valid(&self, timeout: Duration) -> bool;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> SwitchyardResult<()>;
}

/// Driver capability: open a physical connection to a host
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        protocol: &str,
        host: &HostSpec,
        props: &Properties,
    ) -> SwitchyardResult<ConnectionRef>;
}

/// Identity comparison of two connection handles
pub fn same_connection(a: &ConnectionRef, b: &ConnectionRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// True when `conn` is present and not closed
pub fn is_open(conn: Option<&ConnectionRef>) -> bool {
    conn.map(|c| !c.is_closed()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockConnection;

    #[test]
    fn test_same_connection() {
        let a: ConnectionRef = MockConnection::new("a");
        let b: ConnectionRef = MockConnection::new("a");
        let a2 = Arc::clone(&a);

        assert!(same_connection(&a, &a2));
        assert!(!same_connection(&a, &b));
    }

    #[tokio::test]
    async fn test_is_open() {
        let conn: ConnectionRef = MockConnection::new("a");
        assert!(is_open(Some(&conn)));
        assert!(!is_open(None));

        conn.close().await.unwrap();
        assert!(!is_open(Some(&conn)));
    }
}
