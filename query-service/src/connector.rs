//! Connections to external engines.
//!
//! [`Connector`] builds a live connection from a data source and its
//! decrypted password. Nothing is pooled or cached across calls: a read
//! opens, runs, and closes its own connection, and only a preview
//! transaction keeps one open between requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlQueryResult, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{Column, Database, Either, Executor, MySql, MySqlPool, PgPool, Postgres, Row as _, TypeInfo};

use common::errors::{AppError, AppResult};
use common::models::{ColumnInfo, DataSource, DbType, Row};
use common::utils::sql_classifier::TableRef;
use common::utils::CredentialCipher;

/// Rows and counts produced by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

/// Builds engine connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        source: &DataSource,
        password: &str,
    ) -> AppResult<Box<dyn EngineConnection>>;
}

/// A live connection to an external engine.
#[async_trait]
pub trait EngineConnection: Send {
    /// Runs a statement outside any explicit transaction.
    async fn query(&mut self, sql: &str) -> AppResult<RowSet>;

    /// Looks the table up in the engine catalog.
    async fn table_exists(&mut self, table: &TableRef) -> AppResult<bool>;

    /// Opens a transaction. The returned handle owns the underlying session
    /// and releases it on commit or rollback; drop this connection object
    /// instead of closing it.
    async fn begin(&mut self) -> AppResult<Box<dyn EngineTransaction>>;

    async fn close(&mut self);
}

/// An open engine transaction.
#[async_trait]
pub trait EngineTransaction: Send {
    async fn execute(&mut self, sql: &str) -> AppResult<RowSet>;
    async fn commit(&mut self) -> AppResult<()>;
    async fn rollback(&mut self) -> AppResult<()>;
}

/// Decrypts credentials and opens connections for data sources.
#[derive(Clone)]
pub struct ConnectionProvider {
    connector: Arc<dyn Connector>,
    cipher: CredentialCipher,
}

impl ConnectionProvider {
    pub fn new(connector: Arc<dyn Connector>, cipher: CredentialCipher) -> Self {
        Self { connector, cipher }
    }

    /// Opens a connection to the data source.
    ///
    /// # Errors
    /// `Validation` for inactive sources, `Decryption` for unreadable
    /// credentials, `Connection` when the engine cannot be reached.
    pub async fn open(&self, source: &DataSource) -> AppResult<Box<dyn EngineConnection>> {
        if !source.is_active {
            return Err(AppError::Validation(format!(
                "data source {} is inactive",
                source.id
            )));
        }
        let password = self.cipher.decrypt(&source.password_encrypted)?;
        let conn = self.connector.connect(source, &password).await?;
        tracing::debug!(data_source_id = %source.id, db_type = %source.db_type, "connection opened");
        Ok(conn)
    }

    /// Opens a connection and checks that every table exists. The
    /// connection is closed again when a table is missing.
    pub async fn open_validated(
        &self,
        source: &DataSource,
        tables: &[TableRef],
    ) -> AppResult<Box<dyn EngineConnection>> {
        let mut conn = self.open(source).await?;
        if let Err(e) = ensure_tables_exist(conn.as_mut(), tables).await {
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }
}

/// Fails with `SchemaValidation` naming the first table the engine does not know.
pub async fn ensure_tables_exist(
    conn: &mut dyn EngineConnection,
    tables: &[TableRef],
) -> AppResult<()> {
    for table in tables {
        if !conn.table_exists(table).await? {
            return Err(AppError::SchemaValidation {
                table: table.to_string(),
            });
        }
    }
    Ok(())
}

/// Connector for MySQL and PostgreSQL backed by sqlx.
pub struct SqlxConnector {
    connect_timeout: Duration,
}

impl SqlxConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(
        &self,
        source: &DataSource,
        password: &str,
    ) -> AppResult<Box<dyn EngineConnection>> {
        // A single-connection pool gives an owned, 'static transaction handle.
        let conn = match source.db_type {
            DbType::MySQL => {
                let options = MySqlConnectOptions::new()
                    .host(&source.host)
                    .port(source.port)
                    .username(&source.username)
                    .password(password)
                    .database(&source.database);
                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| AppError::Connection(e.to_string()))?;
                SqlxConnection::MySql(pool)
            }
            DbType::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&source.host)
                    .port(source.port)
                    .username(&source.username)
                    .password(password)
                    .database(&source.database);
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(self.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| AppError::Connection(e.to_string()))?;
                SqlxConnection::Postgres(pool)
            }
        };
        Ok(Box::new(conn))
    }
}

/// Live sqlx connection per engine.
enum SqlxConnection {
    MySql(MySqlPool),
    Postgres(PgPool),
}

#[async_trait]
impl EngineConnection for SqlxConnection {
    async fn query(&mut self, sql: &str) -> AppResult<RowSet> {
        match self {
            SqlxConnection::MySql(pool) => {
                let mut set = drain(&*pool, sql, mysql_affected, mysql_row).await?;
                if set.columns.is_empty() {
                    if let Ok(describe) = (&*pool).describe(sql).await {
                        set.columns = describe.columns().iter().map(column_info).collect();
                    }
                }
                Ok(set)
            }
            SqlxConnection::Postgres(pool) => {
                let mut set = drain(&*pool, sql, pg_affected, pg_row).await?;
                if set.columns.is_empty() {
                    if let Ok(describe) = (&*pool).describe(sql).await {
                        set.columns = describe.columns().iter().map(column_info).collect();
                    }
                }
                Ok(set)
            }
        }
    }

    async fn table_exists(&mut self, table: &TableRef) -> AppResult<bool> {
        match self {
            SqlxConnection::MySql(pool) => {
                let count: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM information_schema.TABLES
                     WHERE LOWER(TABLE_NAME) = LOWER(?) AND TABLE_SCHEMA = COALESCE(?, DATABASE())",
                )
                .bind(&table.name)
                .bind(&table.schema)
                .fetch_one(&*pool)
                .await
                .map_err(execution_error)?;
                Ok(count > 0)
            }
            SqlxConnection::Postgres(pool) => sqlx::query_scalar(
                "SELECT EXISTS (
                     SELECT 1 FROM information_schema.tables
                     WHERE lower(table_name) = lower($1)
                       AND (($2::text IS NULL AND table_schema = ANY (current_schemas(false)))
                            OR lower(table_schema) = lower($2::text))
                 )",
            )
            .bind(&table.name)
            .bind(&table.schema)
            .fetch_one(&*pool)
            .await
            .map_err(execution_error),
        }
    }

    async fn begin(&mut self) -> AppResult<Box<dyn EngineTransaction>> {
        let tx = match self {
            SqlxConnection::MySql(pool) => SqlxTransaction::MySql {
                tx: Some(pool.begin().await.map_err(connection_error)?),
                pool: pool.clone(),
            },
            SqlxConnection::Postgres(pool) => SqlxTransaction::Postgres {
                tx: Some(pool.begin().await.map_err(connection_error)?),
                pool: pool.clone(),
            },
        };
        Ok(Box::new(tx))
    }

    async fn close(&mut self) {
        match self {
            SqlxConnection::MySql(pool) => pool.close().await,
            SqlxConnection::Postgres(pool) => pool.close().await,
        }
    }
}

/// Open sqlx transaction. The pool is closed once the transaction ends.
enum SqlxTransaction {
    MySql {
        pool: MySqlPool,
        tx: Option<sqlx::Transaction<'static, MySql>>,
    },
    Postgres {
        pool: PgPool,
        tx: Option<sqlx::Transaction<'static, Postgres>>,
    },
}

#[async_trait]
impl EngineTransaction for SqlxTransaction {
    async fn execute(&mut self, sql: &str) -> AppResult<RowSet> {
        match self {
            SqlxTransaction::MySql { tx: Some(tx), .. } => {
                drain(&mut **tx, sql, mysql_affected, mysql_row).await
            }
            SqlxTransaction::Postgres { tx: Some(tx), .. } => {
                drain(&mut **tx, sql, pg_affected, pg_row).await
            }
            _ => Err(finished()),
        }
    }

    async fn commit(&mut self) -> AppResult<()> {
        match self {
            SqlxTransaction::MySql { pool, tx } => {
                let result = tx.take().ok_or_else(finished)?.commit().await;
                pool.close().await;
                result.map_err(execution_error)
            }
            SqlxTransaction::Postgres { pool, tx } => {
                let result = tx.take().ok_or_else(finished)?.commit().await;
                pool.close().await;
                result.map_err(execution_error)
            }
        }
    }

    async fn rollback(&mut self) -> AppResult<()> {
        match self {
            SqlxTransaction::MySql { pool, tx } => {
                let result = tx.take().ok_or_else(finished)?.rollback().await;
                pool.close().await;
                result.map_err(execution_error)
            }
            SqlxTransaction::Postgres { pool, tx } => {
                let result = tx.take().ok_or_else(finished)?.rollback().await;
                pool.close().await;
                result.map_err(execution_error)
            }
        }
    }
}

fn finished() -> AppError {
    AppError::Internal("engine transaction already finished".into())
}

/// Streams every result of `sql` through the text protocol.
async fn drain<'e, DB, E>(
    executor: E,
    sql: &'e str,
    rows_affected: fn(&DB::QueryResult) -> u64,
    decode: fn(&DB::Row, &[ColumnInfo]) -> Row,
) -> AppResult<RowSet>
where
    DB: Database,
    E: Executor<'e, Database = DB>,
{
    let mut stream = sqlx::raw_sql(sql).fetch_many(executor);
    let mut set = RowSet::default();
    while let Some(item) = stream.try_next().await.map_err(execution_error)? {
        match item {
            Either::Left(done) => set.rows_affected += rows_affected(&done),
            Either::Right(row) => {
                if set.columns.is_empty() {
                    set.columns = row.columns().iter().map(column_info).collect();
                }
                set.rows.push(decode(&row, &set.columns));
            }
        }
    }
    Ok(set)
}

fn column_info<C: Column>(col: &C) -> ColumnInfo {
    ColumnInfo::new(col.name(), col.type_info().name())
}

fn pg_affected(done: &PgQueryResult) -> u64 {
    done.rows_affected()
}

fn mysql_affected(done: &MySqlQueryResult) -> u64 {
    done.rows_affected()
}

fn pg_row(row: &PgRow, columns: &[ColumnInfo]) -> Row {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let text = row.try_get_unchecked::<Option<String>, _>(i).unwrap_or(None);
            (col.name.clone(), decode_cell(text, &col.data_type))
        })
        .collect()
}

fn mysql_row(row: &MySqlRow, columns: &[ColumnInfo]) -> Row {
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let text = match row.try_get_unchecked::<Option<String>, _>(i) {
                Ok(text) => text,
                Err(_) => row
                    .try_get_unchecked::<Option<Vec<u8>>, _>(i)
                    .unwrap_or(None)
                    .map(|b| String::from_utf8_lossy(&b).into_owned()),
            };
            (col.name.clone(), decode_cell(text, &col.data_type))
        })
        .collect()
}

/// Converts a text-protocol cell into JSON using the engine-reported type.
pub fn decode_cell(text: Option<String>, data_type: &str) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    let upper = data_type.to_ascii_uppercase();
    match upper.trim_end_matches(" UNSIGNED") {
        "INT2" | "INT4" | "INT8" | "OID" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT"
        | "INTEGER" | "BIGINT" | "YEAR" => {
            if let Ok(n) = text.parse::<i64>() {
                Value::from(n)
            } else if let Ok(n) = text.parse::<u64>() {
                Value::from(n)
            } else {
                Value::String(text)
            }
        }
        "FLOAT4" | "FLOAT8" | "FLOAT" | "DOUBLE" | "REAL" => {
            match text.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Value::Number(n),
                None => Value::String(text),
            }
        }
        "BOOL" | "BOOLEAN" => match text.as_str() {
            "t" | "true" | "1" => Value::Bool(true),
            "f" | "false" | "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        "JSON" | "JSONB" => match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => Value::String(text),
        },
        _ => Value::String(text),
    }
}

fn execution_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db) => AppError::Execution(db.message().to_string()),
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed) => AppError::Connection(e.to_string()),
        other => AppError::Execution(other.to_string()),
    }
}

fn connection_error(e: sqlx::Error) -> AppError {
    AppError::Connection(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode_cell(Some("42".into()), "INT4"), json!(42));
        assert_eq!(decode_cell(Some("-7".into()), "BIGINT"), json!(-7));
        assert_eq!(
            decode_cell(Some("18446744073709551615".into()), "BIGINT UNSIGNED"),
            json!(18446744073709551615u64)
        );
    }

    #[test]
    fn test_decode_bool_variants() {
        assert_eq!(decode_cell(Some("t".into()), "BOOL"), json!(true));
        assert_eq!(decode_cell(Some("0".into()), "BOOLEAN"), json!(false));
    }

    #[test]
    fn test_decode_json_and_fallbacks() {
        assert_eq!(decode_cell(Some("{\"a\":1}".into()), "JSONB"), json!({"a": 1}));
        assert_eq!(decode_cell(Some("12.50".into()), "NUMERIC"), json!("12.50"));
        assert_eq!(decode_cell(Some("NaN".into()), "FLOAT8"), json!("NaN"));
        assert_eq!(decode_cell(None, "TEXT"), Value::Null);
    }
}
