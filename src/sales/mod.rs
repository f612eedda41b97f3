//! Tabular sales backend
//!
//! The sales spreadsheet is loaded wholesale into a SQLite table and queried
//! with SQL written by the model.

pub mod text_to_sql;

pub use text_to_sql::{generate_sql_query, handle_sales_question};

use crate::error::AssistantError;
use crate::models::Row;
use crate::Result;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

pub const SALES_TABLE: &str = "real_estate";

/// Storage class inferred for a CSV column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }

    /// Narrowest kind that still holds `value`
    fn widen(self, value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return self;
        }
        match self {
            ColumnKind::Integer if value.parse::<i64>().is_ok() => ColumnKind::Integer,
            ColumnKind::Integer | ColumnKind::Real if value.parse::<f64>().is_ok() => ColumnKind::Real,
            _ => ColumnKind::Text,
        }
    }
}

#[derive(Clone)]
pub struct SalesStore {
    pool: SqlitePool,
}

impl SalesStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    #[instrument(name = "load_sales_csv", skip(self))]
    pub async fn load_csv(&self, path: &Path) -> Result<usize> {
        let file = std::fs::File::open(path).map_err(|e| {
            AssistantError::IngestError(format!("Cannot open {}: {}", path.display(), e))
        })?;
        self.load_csv_reader(file).await
    }

    /// Replace the sales table with the CSV contents. Returns the row count.
    pub async fn load_csv_reader<R: Read>(&self, reader: R) -> Result<usize> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() || headers.iter().any(|h| h.is_empty()) {
            return Err(AssistantError::IngestError(
                "Sales CSV must have a non-empty header row".to_string(),
            ));
        }

        let records = csv_reader.records().collect::<std::result::Result<Vec<_>, _>>()?;

        let mut kinds = vec![ColumnKind::Integer; headers.len()];
        for record in &records {
            for (kind, value) in kinds.iter_mut().zip(record.iter()) {
                *kind = kind.widen(value);
            }
        }

        let column_defs = headers
            .iter()
            .zip(&kinds)
            .map(|(name, kind)| format!("{} {}", quote_ident(name), kind.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list = headers.iter().map(|h| quote_ident(h)).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; headers.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            SALES_TABLE, column_list, placeholders
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", SALES_TABLE))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", SALES_TABLE, column_defs))
            .execute(&mut *tx)
            .await?;

        for record in &records {
            let mut query = sqlx::query(&insert_sql);
            for (index, kind) in kinds.iter().enumerate() {
                let raw = record.get(index).map(str::trim).unwrap_or("");
                query = if raw.is_empty() {
                    query.bind(None::<String>)
                } else {
                    match kind {
                        ColumnKind::Integer => query.bind(raw.parse::<i64>().ok()),
                        ColumnKind::Real => query.bind(raw.parse::<f64>().ok()),
                        ColumnKind::Text => query.bind(raw.to_string()),
                    }
                };
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;

        info!(rows = records.len(), columns = headers.len(), "Loaded sales table");
        Ok(records.len())
    }

    /// Run a single model-written statement and decode every row into JSON.
    /// The statement runs in a transaction that is always rolled back, so the
    /// table keeps mirroring the CSV whatever the statement does.
    pub async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>> {
        let statement = single_statement(sql)?;

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(statement).fetch_all(&mut *tx).await;
        let rolled_back = tx.rollback().await;

        let rows = rows?;
        rolled_back?;
        rows.iter().map(row_to_json).collect()
    }
}

/// Strip trailing semicolons and reject input holding more than one
/// statement. Semicolons inside quoted literals and identifiers are ignored.
fn single_statement(sql: &str) -> Result<&str> {
    let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if statement.is_empty() {
        return Err(AssistantError::InvalidQuery("empty SQL statement".to_string()));
    }

    let mut quote: Option<char> = None;
    for c in statement.chars() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => quote = Some(c),
            None if c == ';' => {
                return Err(AssistantError::InvalidQuery(
                    "only a single SQL statement is allowed".to_string(),
                ))
            }
            None => {}
        }
    }

    Ok(statement)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn row_to_json(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();

    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::from(row.try_get::<f64, _>(index)?),
                "BLOB" => Value::String(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
                _ => Value::String(row.try_get::<String, _>(index)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}
