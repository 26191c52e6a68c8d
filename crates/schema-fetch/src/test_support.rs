//! Scriptable in-memory driver for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schema_drivers::{
    DatabaseKind, Driver, DriverError, DriverRegistry, Row, SchemaConnection, SchemaCredential,
    Value,
};

/// What the driver does for one schema.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return these rows after `delay`.
    Rows { rows: Vec<Row>, delay: Duration },
    /// Reject the login.
    Auth,
    /// Never finish connecting.
    Hang,
    /// Connect, then fail the query.
    QueryError,
    /// Panic while querying.
    Panic,
}

impl Behavior {
    pub fn rows(rows: Vec<Row>) -> Self {
        Behavior::Rows {
            rows,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Behavior::Rows {
            rows: vec![count_row(1)],
            delay,
        }
    }
}

/// Single-column row `{"count": n}`.
pub fn count_row(n: i64) -> Row {
    let mut row = Row::new();
    row.insert("count".to_string(), Value::Int(n));
    row
}

/// Tracks how many connections are open at once.
#[derive(Debug, Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl Gauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Driver whose behaviour is scripted per schema.
pub struct MockDriver {
    kind: DatabaseKind,
    default: Behavior,
    scripts: HashMap<String, Behavior>,
    gauge: Arc<Gauge>,
    connects: Arc<AtomicUsize>,
}

impl MockDriver {
    pub fn new(kind: DatabaseKind) -> Self {
        Self {
            kind,
            default: Behavior::rows(vec![count_row(1)]),
            scripts: HashMap::new(),
            gauge: Arc::new(Gauge::default()),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_default(mut self, behavior: Behavior) -> Self {
        self.default = behavior;
        self
    }

    pub fn with_schema(mut self, schema: &str, behavior: Behavior) -> Self {
        self.scripts.insert(schema.to_string(), behavior);
        self
    }

    pub fn gauge(&self) -> Arc<Gauge> {
        Arc::clone(&self.gauge)
    }

    pub fn connects(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }

    /// Registry holding only this driver.
    pub fn into_registry(self, connect_timeout: Duration) -> DriverRegistry {
        let mut registry = DriverRegistry::new().with_connect_timeout(connect_timeout);
        registry.register(self);
        registry
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn connect(
        &self,
        credential: &SchemaCredential,
    ) -> Result<Box<dyn SchemaConnection>, DriverError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let guard = self.gauge.enter();
        let behavior = self
            .scripts
            .get(&credential.schema)
            .unwrap_or(&self.default)
            .clone();

        match behavior {
            Behavior::Auth => Err(DriverError::Auth(format!(
                "Access denied for user '{}'",
                credential.user
            ))),
            Behavior::Hang => std::future::pending().await,
            behavior => Ok(Box::new(MockConnection {
                behavior,
                _guard: guard,
            })),
        }
    }
}

struct MockConnection {
    behavior: Behavior,
    _guard: GaugeGuard,
}

#[async_trait]
impl SchemaConnection for MockConnection {
    async fn fetch_rows(&mut self, _query: &str) -> Result<Vec<Row>, DriverError> {
        match &self.behavior {
            Behavior::Rows { rows, delay } => {
                tokio::time::sleep(*delay).await;
                Ok(rows.clone())
            }
            Behavior::QueryError => Err(DriverError::Query("Table 'stats' doesn't exist".into())),
            Behavior::Panic => panic!("driver exploded"),
            Behavior::Auth | Behavior::Hang => unreachable!(),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }
}

/// MySQL credentials named `prefix0 .. prefix{n-1}`.
pub fn credentials(prefix: &str, n: usize) -> Vec<SchemaCredential> {
    (0..n)
        .map(|i| {
            SchemaCredential::new(
                format!("{prefix}{i}"),
                DatabaseKind::Mysql,
                "db.internal",
                "app",
                "secret",
            )
        })
        .collect()
}
