//! Driver registry and dispatch.
//!
//! The registry is the connection factory: it picks the driver for a
//! credential's database kind and bounds the connect attempt by a timeout.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::credential::{DatabaseKind, SchemaCredential};
use crate::error::DriverError;
use crate::value::Row;

/// Default bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An open connection to one schema.
///
/// Owned exclusively by the task that opened it. Call [`close`] on every
/// exit path; dropping the handle also releases the socket, but without a
/// graceful goodbye to the server.
///
/// [`close`]: SchemaConnection::close
#[async_trait]
pub trait SchemaConnection: Send {
    /// Run `query` and capture every row in result order.
    async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>, DriverError>;

    /// Close the connection.
    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Driver trait for one database engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Database kind this driver serves.
    fn kind(&self) -> DatabaseKind;

    /// Open a connection. Timeouts are applied by the registry.
    async fn connect(
        &self,
        credential: &SchemaCredential,
    ) -> Result<Box<dyn SchemaConnection>, DriverError>;
}

/// Registry of available drivers.
pub struct DriverRegistry {
    drivers: HashMap<DatabaseKind, Arc<dyn Driver>>,
    connect_timeout: Duration,
}

impl DriverRegistry {
    /// Create a new empty registry with the default connect timeout.
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Current connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Register a driver, replacing any driver of the same kind.
    pub fn register<D: Driver + 'static>(&mut self, driver: D) {
        self.drivers.insert(driver.kind(), Arc::new(driver));
    }

    /// Get a driver by kind.
    pub fn get(&self, kind: DatabaseKind) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&kind).cloned()
    }

    /// Check if a driver is registered.
    pub fn has(&self, kind: DatabaseKind) -> bool {
        self.drivers.contains_key(&kind)
    }

    /// List all registered kinds.
    pub fn list(&self) -> Vec<DatabaseKind> {
        let mut kinds: Vec<_> = self.drivers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Open a connection for `credential` within the connect timeout.
    pub async fn connect(
        &self,
        credential: &SchemaCredential,
    ) -> Result<Box<dyn SchemaConnection>, DriverError> {
        let driver = self
            .get(credential.kind)
            .ok_or_else(|| DriverError::Unsupported(credential.kind.to_string()))?;

        tracing::trace!(
            schema = %credential.schema,
            kind = %credential.kind,
            host = %credential.host,
            port = credential.port,
            "Connecting"
        );

        match tokio::time::timeout(self.connect_timeout, driver.connect(credential)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(self.connect_timeout)),
        }
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.list())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct MockConnection;

    #[async_trait]
    impl SchemaConnection for MockConnection {
        async fn fetch_rows(&mut self, _query: &str) -> Result<Vec<Row>, DriverError> {
            let mut row = Row::new();
            row.insert("mock".to_string(), Value::Bool(true));
            Ok(vec![row])
        }

        async fn close(self: Box<Self>) -> Result<(), DriverError> {
            Ok(())
        }
    }

    struct MockDriver {
        delay: Duration,
    }

    #[async_trait]
    impl Driver for MockDriver {
        fn kind(&self) -> DatabaseKind {
            DatabaseKind::Mysql
        }

        async fn connect(
            &self,
            _credential: &SchemaCredential,
        ) -> Result<Box<dyn SchemaConnection>, DriverError> {
            tokio::time::sleep(self.delay).await;
            Ok(Box::new(MockConnection))
        }
    }

    fn credential(kind: DatabaseKind) -> SchemaCredential {
        SchemaCredential::new("tenant_1", kind, "localhost", "app", "pw")
    }

    #[test]
    fn test_registry_new() {
        let registry = DriverRegistry::new();
        assert!(registry.list().is_empty());
        assert_eq!(registry.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_registry_register() {
        let mut registry = DriverRegistry::new();
        registry.register(MockDriver { delay: Duration::ZERO });

        assert!(registry.has(DatabaseKind::Mysql));
        assert!(!registry.has(DatabaseKind::Postgres));
        assert_eq!(registry.list(), vec![DatabaseKind::Mysql]);
    }

    #[tokio::test]
    async fn test_registry_connect() {
        let mut registry = DriverRegistry::new();
        registry.register(MockDriver { delay: Duration::ZERO });

        let mut conn = registry.connect(&credential(DatabaseKind::Mysql)).await.unwrap();
        let rows = conn.fetch_rows("SELECT 1").await.unwrap();
        assert_eq!(rows.len(), 1);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_connect_unsupported() {
        let registry = DriverRegistry::new();
        let result = registry.connect(&credential(DatabaseKind::Postgres)).await;
        assert!(matches!(result, Err(DriverError::Unsupported(kind)) if kind == "postgres"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_connect_timeout() {
        let mut registry = DriverRegistry::new().with_connect_timeout(Duration::from_secs(2));
        registry.register(MockDriver { delay: Duration::from_secs(30) });

        let result = registry.connect(&credential(DatabaseKind::Mysql)).await;
        match result {
            Err(err @ DriverError::Timeout(_)) => {
                assert_eq!(err.to_string(), "Connection timed out after 2s");
            }
            Err(other) => panic!("expected timeout, got {other}"),
            Ok(_) => panic!("expected timeout, got a connection"),
        }
    }
}
