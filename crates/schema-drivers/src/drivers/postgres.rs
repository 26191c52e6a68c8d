//! PostgreSQL driver.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Row as _};

use super::{decimal_value, raw_value};
use crate::credential::{DatabaseKind, SchemaCredential};
use crate::error::DriverError;
use crate::registry::{Driver, SchemaConnection};
use crate::value::{Row, Value};

/// PostgreSQL driver.
#[derive(Debug, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver.
    pub fn new() -> Self {
        Self
    }

    /// Build connect options from a credential.
    fn connect_options(credential: &SchemaCredential) -> Result<PgConnectOptions, DriverError> {
        let mut options = PgConnectOptions::new()
            .host(&credential.host)
            .port(credential.port)
            .username(&credential.user)
            .password(&credential.password)
            .database(credential.database());

        if let Some(mode) = credential.param("ssl_mode") {
            let mode = PgSslMode::from_str(mode).map_err(|e| {
                DriverError::Configuration(format!("Invalid ssl_mode '{}': {}", mode, e))
            })?;
            options = options.ssl_mode(mode);
        }

        if let Some(name) = credential.param("application_name") {
            options = options.application_name(name);
        }

        Ok(options)
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn connect(
        &self,
        credential: &SchemaCredential,
    ) -> Result<Box<dyn SchemaConnection>, DriverError> {
        let options = Self::connect_options(credential)?;
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(DriverError::from_connect)?;

        Ok(Box::new(PgSchemaConnection { conn }))
    }
}

/// Open PostgreSQL connection for one schema.
struct PgSchemaConnection {
    conn: PgConnection,
}

#[async_trait]
impl SchemaConnection for PgSchemaConnection {
    async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>, DriverError> {
        let rows = sqlx::query(query)
            .fetch_all(&mut self.conn)
            .await
            .map_err(DriverError::from_query)?;

        Ok(rows.iter().map(convert_row).collect())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.conn.close().await.map_err(DriverError::from_query)
    }
}

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), pg_value(row, col.ordinal())))
        .collect()
}

/// Convert a PostgreSQL column to a value.
fn pg_value(row: &PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|n| Value::Int(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|n| Value::Int(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
        return v.map(decimal_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| Value::Float(f.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return v.map(Value::Timestamp).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v.map(|dt| Value::Timestamp(dt.and_utc())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return v
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
        return v
            .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map(|j| Value::Text(j.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Binary).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
        return v.map(raw_value).unwrap_or(Value::Null);
    }

    tracing::debug!(column = idx, "Undecodable PostgreSQL column, storing NULL");
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_kind() {
        assert_eq!(PostgresDriver::new().kind(), DatabaseKind::Postgres);
    }

    #[test]
    fn test_connect_options_with_params() {
        let cred = SchemaCredential::new("tenant_1", DatabaseKind::Postgres, "db1", "app", "pw")
            .with_param("ssl_mode", "prefer")
            .with_param("application_name", "schema-fetch");
        assert!(PostgresDriver::connect_options(&cred).is_ok());
    }

    #[test]
    fn test_connect_options_rejects_bad_ssl_mode() {
        let cred = SchemaCredential::new("tenant_1", DatabaseKind::Postgres, "db1", "app", "pw")
            .with_param("ssl_mode", "always-ish");
        assert!(matches!(
            PostgresDriver::connect_options(&cred),
            Err(DriverError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_error() {
        let cred =
            SchemaCredential::new("tenant_1", DatabaseKind::Postgres, "127.0.0.1", "app", "pw")
                .with_port(1);
        let result = PostgresDriver::new().connect(&cred).await;
        assert!(matches!(result, Err(DriverError::Network(_))));
    }
}
