// 🐬 MySQL - second `Database` implementation, for a shared server
//
// Components write every statement once, in SQLite syntax. On the way to
// MySQL two things are rewritten:
// - numbered `?N` placeholders become plain `?`, with the parameters
//   re-ordered (and repeated) to match
// - `IS ?N` becomes MySQL's null-safe `<=> ?`
//
// The translation is always compiled; the driver needs `--features mysql`.

use crate::db::SqlValue;
use crate::error::{KilluaError, Result};

#[cfg(feature = "mysql")]
pub use driver::MysqlDatabase;

/// Rewrite `sql` for a driver that only understands positional `?`.
///
/// Returns the new statement and the parameters in placeholder order.
/// Quoted literals are left alone. A bare `?` takes the next parameter.
pub fn to_positional(sql: &str, params: &[SqlValue]) -> Result<(String, Vec<SqlValue>)> {
    let mut out = String::with_capacity(sql.len());
    let mut bound = Vec::with_capacity(params.len());
    let mut next = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '?' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }

                let index = if digits.is_empty() {
                    next += 1;
                    next
                } else {
                    digits
                        .parse::<usize>()
                        .map_err(|_| KilluaError::Decode(format!("bad placeholder ?{}", digits)))?
                };
                let value = index
                    .checked_sub(1)
                    .and_then(|i| params.get(i))
                    .ok_or_else(|| {
                        KilluaError::Decode(format!(
                            "placeholder ?{} has no parameter ({} given)",
                            index,
                            params.len()
                        ))
                    })?;

                rewrite_null_safe(&mut out);
                out.push('?');
                bound.push(value.clone());
            }
            _ => out.push(c),
        }
    }

    Ok((out, bound))
}

/// Turn a trailing ` IS ` into ` <=> ` just before a placeholder.
fn rewrite_null_safe(out: &mut String) {
    let end = out.trim_end().len();
    let bytes = out.as_bytes();
    if end >= 3
        && bytes[end - 2..end].eq_ignore_ascii_case(b"IS")
        && bytes[end - 3].is_ascii_whitespace()
    {
        out.truncate(end - 2);
        out.push_str("<=> ");
    }
}

#[cfg(feature = "mysql")]
mod driver {
    use mysql::consts::ColumnType;
    use mysql::prelude::Queryable;
    use mysql::{Conn, OptsBuilder, Params, Value};
    use tracing::debug;

    use super::to_positional;
    use crate::config::DatabaseConfig;
    use crate::db::{Backend, Database, Row, SqlValue};
    use crate::error::{KilluaError, Result};

    /// One MySQL connection. Transactions are plain `START TRANSACTION` /
    /// `COMMIT` / `ROLLBACK` on it.
    pub struct MysqlDatabase {
        conn: Conn,
    }

    impl MysqlDatabase {
        pub fn connect(config: &DatabaseConfig) -> Result<Self> {
            let opts = OptsBuilder::new()
                .ip_or_hostname(Some(config.host.clone()))
                .tcp_port(config.port)
                .user(Some(config.user.clone()))
                .pass(Some(config.password.clone()))
                .db_name(Some(config.name.clone()));

            let conn = Conn::new(opts)?;
            debug!(location = %config.location(), "connected to mysql");
            Ok(MysqlDatabase { conn })
        }
    }

    fn to_params(values: &[SqlValue]) -> Params {
        if values.is_empty() {
            Params::Empty
        } else {
            Params::Positional(values.iter().map(to_mysql).collect())
        }
    }

    fn to_mysql(value: &SqlValue) -> Value {
        match value {
            SqlValue::Null => Value::NULL,
            SqlValue::Integer(i) => Value::Int(*i),
            SqlValue::Real(f) => Value::Double(*f),
            SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
            SqlValue::Blob(b) => Value::Bytes(b.clone()),
        }
    }

    fn from_mysql(value: Value, column_type: Option<ColumnType>) -> Result<SqlValue> {
        Ok(match value {
            Value::NULL => SqlValue::Null,
            Value::Int(i) => SqlValue::Integer(i),
            Value::UInt(u) => SqlValue::Integer(i64::try_from(u).map_err(|_| {
                KilluaError::Decode(format!("unsigned value {} out of range", u))
            })?),
            Value::Float(f) => SqlValue::Real(f64::from(f)),
            Value::Double(f) => SqlValue::Real(f),
            // SUM over integer columns comes back as DECIMAL text
            Value::Bytes(bytes)
                if matches!(
                    column_type,
                    Some(ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL)
                ) =>
            {
                let text = String::from_utf8_lossy(&bytes);
                SqlValue::Real(text.trim().parse().map_err(|_| {
                    KilluaError::Decode(format!("bad decimal {:?}", text))
                })?)
            }
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => SqlValue::Text(text),
                Err(err) => SqlValue::Blob(err.into_bytes()),
            },
            Value::Date(y, mo, d, h, mi, s, _) => SqlValue::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                y, mo, d, h, mi, s
            )),
            Value::Time(negative, days, h, mi, s, _) => SqlValue::Text(format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                days * 24 + u32::from(h),
                mi,
                s
            )),
        })
    }

    fn from_mysql_row(row: &mysql::Row) -> Result<Row> {
        let columns = row.columns_ref();
        (0..row.len())
            .map(|idx| {
                let value = row.as_ref(idx).cloned().unwrap_or(Value::NULL);
                from_mysql(value, columns.get(idx).map(|c| c.column_type()))
            })
            .collect::<Result<Vec<_>>>()
            .map(Row::new)
    }

    impl Database for MysqlDatabase {
        fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
            let (sql, bound) = to_positional(sql, params)?;
            if bound.is_empty() {
                // DDL and parameterless statements go over the text protocol
                self.conn.query_drop(sql.as_str())?;
            } else {
                self.conn.exec_drop(sql.as_str(), to_params(&bound))?;
            }
            Ok(self.conn.affected_rows() as usize)
        }

        fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
            Ok(self.fetch_all(sql, params)?.into_iter().next())
        }

        fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
            let (sql, bound) = to_positional(sql, params)?;
            // Always prepared, so numbers come back typed rather than as text
            let rows: Vec<mysql::Row> = self.conn.exec(sql.as_str(), to_params(&bound))?;
            rows.iter().map(from_mysql_row).collect()
        }

        fn begin(&mut self) -> Result<()> {
            self.conn.query_drop("START TRANSACTION")?;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.conn.query_drop("COMMIT")?;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.conn.query_drop("ROLLBACK")?;
            Ok(())
        }

        fn last_insert_id(&self) -> i64 {
            self.conn.last_insert_id() as i64
        }

        fn backend(&self) -> Backend {
            Backend::Mysql
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::db::setup_database;
        use crate::entities::{DeviceRegistry, Owner, RateProvider};

        #[test]
        fn test_decimal_and_text_columns() {
            let sum = from_mysql(
                Value::Bytes(b"12.50".to_vec()),
                Some(ColumnType::MYSQL_TYPE_NEWDECIMAL),
            )
            .unwrap();
            assert_eq!(sum, SqlValue::Real(12.5));

            let name = from_mysql(Value::Bytes(b"Fan".to_vec()), Some(ColumnType::MYSQL_TYPE_VAR_STRING))
                .unwrap();
            assert_eq!(name, SqlValue::Text("Fan".to_string()));
            assert_eq!(from_mysql(Value::UInt(7), None).unwrap(), SqlValue::Integer(7));
        }

        /// Needs a reachable server configured through KILLUA_DB_* variables.
        #[test]
        #[ignore]
        fn test_live_server_round_trip() {
            let mut config = crate::config::Config::default();
            config.apply_env(|key| std::env::var(key).ok()).unwrap();
            config.database.backend = Backend::Mysql;

            let mut db = MysqlDatabase::connect(&config.database).unwrap();
            setup_database(&mut db, 12.64, true).unwrap();

            let owner = Owner::User(9_000_001);
            let device = DeviceRegistry::new(&mut db)
                .add_device("Live Test Fan", 60.0, owner)
                .unwrap();
            let seen = DeviceRegistry::new(&mut db).list_devices(owner).unwrap();
            assert!(seen.iter().any(|d| d.id == device.id));

            assert!(RateProvider::new(&mut db, 12.64).current_rate().unwrap() > 0.0);
            DeviceRegistry::new(&mut db).delete_device(device.id, owner).unwrap();
        }
    }
}
