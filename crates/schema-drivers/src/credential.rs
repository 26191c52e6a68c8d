//! Schema credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Database engine a schema lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// MySQL or MariaDB.
    #[serde(alias = "mariadb")]
    Mysql,
    /// PostgreSQL.
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
}

impl DatabaseKind {
    /// Port used when a credential does not carry one.
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::Mysql => 3306,
            DatabaseKind::Postgres => 5432,
        }
    }

    /// Stable lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgres => "postgres",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseKind::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            other => Err(DriverError::Unsupported(other.to_string())),
        }
    }
}

/// How to reach one schema.
///
/// Read once from the meta database and never mutated afterwards.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCredential {
    /// Schema name, unique across a run.
    pub schema: String,

    /// Database engine.
    pub kind: DatabaseKind,

    /// Server host.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Login user.
    pub user: String,

    /// Login password.
    #[serde(skip_serializing, default)]
    pub password: String,

    /// Extra connection parameters (`database`, `ssl_mode`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl SchemaCredential {
    /// Create a credential on the kind's default port.
    pub fn new(
        schema: impl Into<String>,
        kind: DatabaseKind,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            kind,
            host: host.into(),
            port: kind.default_port(),
            user: user.into(),
            password: password.into(),
            params: BTreeMap::new(),
        }
    }

    /// Override the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add an extra connection parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Database to connect to: the `database` parameter, else the schema name.
    pub fn database(&self) -> &str {
        self.params
            .get("database")
            .map(String::as_str)
            .unwrap_or(&self.schema)
    }

    /// Look up an extra connection parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl fmt::Debug for SchemaCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCredential")
            .field("schema", &self.schema)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("mysql".parse::<DatabaseKind>().unwrap(), DatabaseKind::Mysql);
        assert_eq!("MariaDB".parse::<DatabaseKind>().unwrap(), DatabaseKind::Mysql);
        assert_eq!("postgresql".parse::<DatabaseKind>().unwrap(), DatabaseKind::Postgres);
        assert!(matches!(
            "oracle".parse::<DatabaseKind>(),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_kind_serde() {
        let kind: DatabaseKind = serde_json::from_str("\"pg\"").unwrap();
        assert_eq!(kind, DatabaseKind::Postgres);
        assert_eq!(serde_json::to_string(&DatabaseKind::Mysql).unwrap(), "\"mysql\"");
    }

    #[test]
    fn test_default_port() {
        let cred = SchemaCredential::new("tenant_1", DatabaseKind::Postgres, "db1", "app", "pw");
        assert_eq!(cred.port, 5432);
        assert_eq!(cred.with_port(6432).port, 6432);
    }

    #[test]
    fn test_database_falls_back_to_schema() {
        let cred = SchemaCredential::new("tenant_1", DatabaseKind::Mysql, "db1", "app", "pw");
        assert_eq!(cred.database(), "tenant_1");

        let cred = cred.with_param("database", "tenant_1_prod");
        assert_eq!(cred.database(), "tenant_1_prod");
    }

    #[test]
    fn test_password_is_redacted() {
        let cred = SchemaCredential::new("tenant_1", DatabaseKind::Mysql, "db1", "app", "hunter2");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));

        let json = serde_json::to_string(&cred).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
