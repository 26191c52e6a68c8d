//! Built-in driver implementations.
//!
//! - `mysql` - MySQL / MariaDB via `sqlx::MySqlConnection`
//! - `postgres` - PostgreSQL via `sqlx::PgConnection`

mod mysql;
mod postgres;

pub use self::mysql::MySqlDriver;
pub use self::postgres::PostgresDriver;

use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::registry::DriverRegistry;
use crate::value::Value;

/// Create a driver registry with all built-in drivers registered.
pub fn create_default_registry(connect_timeout: Duration) -> DriverRegistry {
    let mut registry = DriverRegistry::new().with_connect_timeout(connect_timeout);

    registry.register(MySqlDriver::new());
    registry.register(PostgresDriver::new());

    registry
}

/// Whole decimals that fit become integers; everything else keeps its exact
/// text so no precision is lost.
pub(crate) fn decimal_value(d: Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return Value::Int(i);
        }
    }
    Value::Text(d.to_string())
}

/// Raw column bytes of a type no decoder claimed.
pub(crate) fn raw_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::Text(text),
        Err(e) => Value::Binary(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::DatabaseKind;
    use std::str::FromStr;

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry(Duration::from_secs(3));
        assert_eq!(
            registry.list(),
            vec![DatabaseKind::Mysql, DatabaseKind::Postgres]
        );
        assert_eq!(registry.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_decimal_value() {
        assert_eq!(decimal_value(Decimal::from_str("42").unwrap()), Value::Int(42));
        assert_eq!(decimal_value(Decimal::from_str("42.000").unwrap()), Value::Int(42));
        assert_eq!(
            decimal_value(Decimal::from_str("12.50").unwrap()),
            Value::Text("12.50".to_string())
        );
        assert_eq!(
            decimal_value(Decimal::from_str("79228162514264337593543950335").unwrap()),
            Value::Text("79228162514264337593543950335".to_string())
        );
    }

    #[test]
    fn test_raw_value() {
        assert_eq!(raw_value(b"1 day".to_vec()), Value::Text("1 day".to_string()));
        assert_eq!(raw_value(vec![0xff, 0xfe]), Value::Binary(vec![0xff, 0xfe]));
    }
}
