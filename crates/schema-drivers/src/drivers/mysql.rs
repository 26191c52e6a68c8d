//! MySQL driver.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{Column, Connection, Row as _};

use super::{decimal_value, raw_value};
use crate::credential::{DatabaseKind, SchemaCredential};
use crate::error::DriverError;
use crate::registry::{Driver, SchemaConnection};
use crate::value::{Row, Value};

/// MySQL / MariaDB driver.
#[derive(Debug, Default)]
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver.
    pub fn new() -> Self {
        Self
    }

    /// Build connect options from a credential.
    fn connect_options(credential: &SchemaCredential) -> Result<MySqlConnectOptions, DriverError> {
        let mut options = MySqlConnectOptions::new()
            .host(&credential.host)
            .port(credential.port)
            .username(&credential.user)
            .password(&credential.password)
            .database(credential.database());

        if let Some(mode) = credential.param("ssl_mode") {
            let mode = MySqlSslMode::from_str(mode).map_err(|e| {
                DriverError::Configuration(format!("Invalid ssl_mode '{}': {}", mode, e))
            })?;
            options = options.ssl_mode(mode);
        }

        if let Some(charset) = credential.param("charset") {
            options = options.charset(charset);
        }

        Ok(options)
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mysql
    }

    async fn connect(
        &self,
        credential: &SchemaCredential,
    ) -> Result<Box<dyn SchemaConnection>, DriverError> {
        let options = Self::connect_options(credential)?;
        let conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(DriverError::from_connect)?;

        Ok(Box::new(MySqlSchemaConnection { conn }))
    }
}

/// Open MySQL connection for one schema.
struct MySqlSchemaConnection {
    conn: MySqlConnection,
}

#[async_trait]
impl SchemaConnection for MySqlSchemaConnection {
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

fn convert_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), extract_value(row, col.ordinal())))
        .collect()
}

/// Decode one column. Each `try_get` only succeeds for compatible column
/// types, so the order below goes from the most to the least specific.
fn extract_value(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v
            .map(|u| i64::try_from(u).map(Value::Int).unwrap_or(Value::Float(u as f64)))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
        return v.map(decimal_value).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
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
    if let Ok(v) = row.try_get::<Option<sqlx::types::Json<serde_json::Value>>, _>(idx) {
        return v.map(|j| Value::Text(j.0.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Binary).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
        return v.map(raw_value).unwrap_or(Value::Null);
    }

    tracing::debug!(column = idx, "Undecodable MySQL column, storing NULL");
    Value::Null
}
