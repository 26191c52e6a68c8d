//! Credential store backed by the meta database.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use schema_drivers::{DatabaseKind, DriverRegistry, Row, SchemaCredential, Value};

use crate::config::MetaDbConfig;
use crate::error::{FetchError, RunResult};

const SCHEMA_COLUMNS: &[&str] = &["schema_name", "schema", "database_name"];
const HOST_COLUMNS: &[&str] = &["host", "server_name", "hostname"];
const USER_COLUMNS: &[&str] = &["user", "username", "database_user"];
const PASSWORD_COLUMNS: &[&str] = &["password", "database_password"];
const PORT_COLUMNS: &[&str] = &["port", "database_port"];
const KIND_COLUMNS: &[&str] = &["db_type", "database_type", "type"];

/// Reads schema credentials from the meta database.
pub struct CredentialStore<'a> {
    registry: &'a DriverRegistry,
    meta: &'a MetaDbConfig,
    query: &'a str,
    default_kind: DatabaseKind,
}

impl<'a> CredentialStore<'a> {
    pub fn new(
        registry: &'a DriverRegistry,
        meta: &'a MetaDbConfig,
        query: &'a str,
        default_kind: DatabaseKind,
    ) -> Self {
        Self {
            registry,
            meta,
            query,
            default_kind,
        }
    }

    /// Enumerate every schema credential.
    ///
    /// The meta connection is opened once and closed before returning. Any
    /// failure here is fatal to the run.
    pub async fn load(&self) -> RunResult<Vec<SchemaCredential>> {
        let address = format!("{}:{}/{}", self.meta.host, self.meta.port(), self.meta.database);
        tracing::info!(kind = %self.meta.kind, meta = %address, "Loading schema credentials");

        let mut conn = self
            .registry
            .connect(&self.meta.credential())
            .await
            .map_err(|e| FetchError::Config(format!("meta database {}: {}", address, e)))?;

        let rows = conn.fetch_rows(self.query).await;
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Meta connection close failed");
        }
        let rows = rows.map_err(|e| {
            FetchError::Config(format!("credential query on {} failed: {}", address, e))
        })?;

        let credentials = self.map_rows(&rows)?;
        tracing::info!(schemas = credentials.len(), "Schema credentials loaded");
        Ok(credentials)
    }

    /// Convert result rows, keeping the first credential seen for each schema.
    pub fn map_rows(&self, rows: &[Row]) -> RunResult<Vec<SchemaCredential>> {
        let mut seen = HashSet::new();
        let mut credentials = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            let credential = credential_from_row(row, self.default_kind).map_err(|e| {
                tracing::error!(row = index + 1, error = %e, "Unusable credential row");
                FetchError::Config(format!("credential row {}: {}", index + 1, e))
            })?;

            if !seen.insert(credential.schema.clone()) {
                tracing::warn!(schema = %credential.schema, "Duplicate schema credential ignored");
                continue;
            }
            credentials.push(credential);
        }

        Ok(credentials)
    }
}

/// Map one meta row to a credential. Column names match case-insensitively.
pub fn credential_from_row(
    row: &Row,
    default_kind: DatabaseKind,
) -> Result<SchemaCredential, String> {
    let columns: HashMap<String, &Value> = row
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();

    let schema = required(&columns, "schema name", SCHEMA_COLUMNS)?;
    let host = required(&columns, "host", HOST_COLUMNS)?;
    let user = required(&columns, "user", USER_COLUMNS)?;
    let password = lookup(&columns, PASSWORD_COLUMNS)
        .map(Value::to_plain_string)
        .unwrap_or_default();

    let kind = match text(&columns, KIND_COLUMNS) {
        Some(raw) => {
            DatabaseKind::from_str(&raw).map_err(|e| format!("schema {}: {}", schema, e))?
        }
        None => default_kind,
    };

    let mut credential = SchemaCredential::new(&schema, kind, host, user, password);
    if let Some(value) = lookup(&columns, PORT_COLUMNS) {
        let port = parse_port(value).map_err(|e| format!("schema {}: {}", schema, e))?;
        credential = credential.with_port(port);
    }

    let known: HashSet<&str> = [
        SCHEMA_COLUMNS,
        HOST_COLUMNS,
        USER_COLUMNS,
        PASSWORD_COLUMNS,
        PORT_COLUMNS,
        KIND_COLUMNS,
    ]
    .concat()
    .into_iter()
    .collect();

    for (name, value) in &columns {
        if !known.contains(name.as_str()) {
            credential = credential.with_param(name.clone(), value.to_plain_string());
        }
    }

    Ok(credential)
}

fn lookup<'r>(columns: &HashMap<String, &'r Value>, aliases: &[&str]) -> Option<&'r Value> {
    aliases.iter().find_map(|a| columns.get(*a).copied())
}

fn text(columns: &HashMap<String, &Value>, aliases: &[&str]) -> Option<String> {
    lookup(columns, aliases)
        .map(|v| v.to_plain_string().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required(
    columns: &HashMap<String, &Value>,
    field: &str,
    aliases: &[&str],
) -> Result<String, String> {
    text(columns, aliases)
        .ok_or_else(|| format!("missing {} (expected one of {})", field, aliases.join(", ")))
}

fn parse_port(value: &Value) -> Result<u16, String> {
    let port = match value {
        Value::Int(n) => u16::try_from(*n).ok(),
        Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u16::MAX) => {
            Some(*f as u16)
        }
        Value::Text(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.filter(|p| *p != 0)
        .ok_or_else(|| format!("invalid port '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Behavior, MockDriver};
    use std::time::Duration;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_canonical_columns() {
        let cred = credential_from_row(
            &row(&[
                ("schema_name", "tenant_1".into()),
                ("host", "db1.internal".into()),
                ("port", Value::Int(3307)),
                ("user", "app".into()),
                ("password", "secret".into()),
                ("db_type", "mysql".into()),
            ]),
            DatabaseKind::Postgres,
        )
        .unwrap();

        assert_eq!(cred.schema, "tenant_1");
        assert_eq!(cred.host, "db1.internal");
        assert_eq!(cred.port, 3307);
        assert_eq!(cred.user, "app");
        assert_eq!(cred.password, "secret");
        assert_eq!(cred.kind, DatabaseKind::Mysql);
        assert!(cred.params.is_empty());
    }

    #[test]
    fn test_aliases_and_defaults() {
        let cred = credential_from_row(
            &row(&[
                ("Database_Name", "tenant_2".into()),
                ("SERVER_NAME", "db2.internal".into()),
                ("database_user", "reader".into()),
                ("database_password", Value::Null),
                ("database_port", "5433".into()),
                ("ssl_mode", "require".into()),
                ("region", Value::Null),
            ]),
            DatabaseKind::Postgres,
        )
        .unwrap();

        assert_eq!(cred.schema, "tenant_2");
        assert_eq!(cred.host, "db2.internal");
        assert_eq!(cred.user, "reader");
        assert_eq!(cred.password, "");
        assert_eq!(cred.port, 5433);
        assert_eq!(cred.kind, DatabaseKind::Postgres);
        assert_eq!(cred.param("ssl_mode"), Some("require"));
        assert_eq!(cred.param("region"), None);
    }

    #[test]
    fn test_default_port_follows_kind() {
        let cred = credential_from_row(
            &row(&[
                ("schema", "tenant_3".into()),
                ("hostname", "db3".into()),
                ("username", "app".into()),
                ("type", "postgresql".into()),
            ]),
            DatabaseKind::Mysql,
        )
        .unwrap();
        assert_eq!(cred.kind, DatabaseKind::Postgres);
        assert_eq!(cred.port, 5432);
    }

    #[test]
    fn test_missing_required_column() {
        let err = credential_from_row(
            &row(&[("schema_name", "tenant_4".into()), ("user", "app".into())]),
            DatabaseKind::Mysql,
        )
        .unwrap_err();
        assert!(err.contains("missing host"));
    }

    #[test]
    fn test_invalid_port_and_kind() {
        let base = [
            ("schema_name", Value::from("tenant_5")),
            ("host", "db5".into()),
            ("user", "app".into()),
        ];

        let mut bad_port = base.to_vec();
        bad_port.push(("port", Value::Int(70_000)));
        assert!(credential_from_row(&row(&bad_port), DatabaseKind::Mysql).is_err());

        let mut bad_kind = base.to_vec();
        bad_kind.push(("db_type", "oracle".into()));
        assert!(credential_from_row(&row(&bad_kind), DatabaseKind::Mysql).is_err());
    }

    #[test]
    fn test_bad_row_error_names_row_and_schema() {
        let registry = MockDriver::new(DatabaseKind::Mysql).into_registry(Duration::from_secs(1));
        let meta = MetaDbConfig::default();
        let store = CredentialStore::new(&registry, &meta, "SELECT 1", DatabaseKind::Mysql);

        let mut rows = meta_rows();
        rows[1].insert("db_type".to_string(), "oracle".into());

        let err = store.map_rows(&rows).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("credential row 2"), "{message}");
        assert!(message.contains("tenant_2"), "{message}");
    }

    fn meta_rows() -> Vec<Row> {
        vec![
            row(&[
                ("schema_name", "tenant_1".into()),
                ("host", "db1".into()),
                ("user", "app".into()),
            ]),
            row(&[
                ("schema_name", "tenant_2".into()),
                ("host", "db2".into()),
                ("user", "app".into()),
            ]),
            row(&[
                ("schema_name", "tenant_1".into()),
                ("host", "db9".into()),
                ("user", "app".into()),
            ]),
        ]
    }

    #[tokio::test]
    async fn test_load_from_meta_database() {
        let driver = MockDriver::new(DatabaseKind::Mysql)
            .with_schema("meta", Behavior::rows(meta_rows()));
        let gauge = driver.gauge();
        let registry = driver.into_registry(Duration::from_secs(10));
        let meta = MetaDbConfig::default();

        let store =
            CredentialStore::new(&registry, &meta, "SELECT * FROM creds", DatabaseKind::Mysql);
        let creds = store.load().await.unwrap();

        let names: Vec<&str> = creds.iter().map(|c| c.schema.as_str()).collect();
        assert_eq!(names, vec!["tenant_1", "tenant_2"]);
        assert_eq!(creds[0].host, "db1");
        assert_eq!(gauge.active(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_meta_is_config_error() {
        let driver = MockDriver::new(DatabaseKind::Mysql).with_schema("meta", Behavior::Auth);
        let registry = driver.into_registry(Duration::from_secs(10));
        let meta = MetaDbConfig::default();

        let store = CredentialStore::new(&registry, &meta, "SELECT 1", DatabaseKind::Mysql);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, FetchError::Config(ref m) if m.contains("meta database")));
    }

    #[tokio::test]
    async fn test_failed_enumeration_is_config_error() {
        let driver =
            MockDriver::new(DatabaseKind::Mysql).with_schema("meta", Behavior::QueryError);
        let gauge = driver.gauge();
        let registry = driver.into_registry(Duration::from_secs(10));
        let meta = MetaDbConfig::default();

        let store = CredentialStore::new(&registry, &meta, "SELECT 1", DatabaseKind::Mysql);
        assert!(matches!(store.load().await, Err(FetchError::Config(_))));
        assert_eq!(gauge.active(), 0);
    }
}
