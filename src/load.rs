use crate::error::{PipelineError, Result};
use crate::structs::{LoadReport, emit};
use arrow_array::{
    Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray,
};
use arrow_schema::{DataType, Schema, TimeUnit};
use chrono::DateTime;
use log::{Level, Log};
use rusqlite::{Connection, params_from_iter, types::Value};
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const STAGING_SUFFIX: &str = "__staging";

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Memory,
    File(PathBuf),
}

/// Parses a SQLite connection string.
///
/// Accepts `sqlite::memory:`, `sqlite://<path>` and `sqlite:<path>`. A
/// `user:pass@` prefix before the path is accepted and ignored.
///
/// # Errors
/// Returns `PipelineError::Load` for other schemes or an empty path.
pub fn parse_db_url(db_url: &str) -> Result<Destination> {
    if db_url == "sqlite::memory:" || db_url == "sqlite://:memory:" {
        return Ok(Destination::Memory);
    }
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .ok_or_else(|| {
            let scheme = db_url.split(':').next().unwrap_or_default();
            PipelineError::Load(format!("unsupported connection string scheme: {scheme}"))
        })?;
    // Userinfo can only sit in the authority, before the first '/'.
    let authority = &rest[..rest.find('/').unwrap_or(rest.len())];
    let path = authority.rfind('@').map_or(rest, |at| &rest[at + 1..]);
    if path.is_empty() {
        return Err(PipelineError::Load(
            "connection string has no database path".to_string(),
        ));
    }
    Ok(Destination::File(PathBuf::from(path)))
}

/// Writes the batch to `table_name`, replacing the table's contents and schema.
///
/// The connection lives only for this call.
///
/// # Arguments
/// * `batch` - Validated batch; its column order becomes the table's
/// * `db_url` - SQLite connection string, see [`parse_db_url`]
/// * `table_name` - Destination table, created or replaced
/// * `logger` - Destination for stage start/success/error lines
///
/// # Returns
/// Returns a `LoadReport` with the table name and rows written.
///
/// # Errors
/// Returns `PipelineError::Load` if the connection string is unsupported, the
/// database cannot be opened, or any statement fails. A failed load leaves the
/// previous table untouched.
pub fn load(
    batch: &RecordBatch,
    db_url: &str,
    table_name: &str,
    logger: &dyn Log,
) -> Result<LoadReport> {
    emit(
        logger,
        Level::Info,
        format_args!("Starting data load into {} table", table_name),
    );

    let result = parse_db_url(db_url).and_then(|destination| {
        let mut conn = match destination {
            Destination::Memory => Connection::open_in_memory()?,
            Destination::File(path) => Connection::open(path)?,
        };
        replace_table(&mut conn, batch, table_name)
    });

    match result {
        Ok(report) => {
            emit(
                logger,
                Level::Info,
                format_args!(
                    "Data load completed successfully | {} rows written to {}",
                    report.rows_written, report.table
                ),
            );
            Ok(report)
        }
        Err(e) => {
            emit(logger, Level::Error, format_args!("Error during data load: {e}"));
            Err(e)
        }
    }
}

/// Replaces `table_name` with the batch contents on an open connection.
///
/// Rows go into a staging table first; the old table is dropped and the
/// staging table renamed in the same transaction, so readers see either the
/// old table or the complete new one.
///
/// # Arguments
/// * `conn` - Open connection; the transaction is scoped to this call
/// * `batch` - Rows to write, no index column is added
/// * `table_name` - Table to replace
///
/// # Returns
/// Returns a `LoadReport` with the table name and rows written.
///
/// # Errors
/// Returns `PipelineError::Load` if any statement fails or a column type has no
/// SQL mapping, or if a table named `<table_name>__staging` already exists.
/// The transaction is rolled back in that case.
pub fn replace_table(
    conn: &mut Connection,
    batch: &RecordBatch,
    table_name: &str,
) -> Result<LoadReport> {
    let schema = batch.schema();
    let staging = format!("{table_name}{STAGING_SUFFIX}");
    let create_sql = create_table_sql(&staging, &schema)?;
    let insert_sql = insert_sql(&staging, &schema);

    let tx = conn.transaction()?;
    let staging_exists: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE name = ?1)",
        [&staging],
        |row| row.get(0),
    )?;
    if staging_exists {
        return Err(PipelineError::Load(format!(
            "staging table {staging} already exists; refusing to overwrite it"
        )));
    }
    tx.execute_batch(&create_sql)?;
    {
        let mut stmt = tx.prepare(&insert_sql)?;
        for row in 0..batch.num_rows() {
            let values = batch
                .columns()
                .iter()
                .map(|column| sql_value(column, row))
                .collect::<Result<Vec<_>>>()?;
            stmt.execute(params_from_iter(values))?;
        }
    }
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table_name)))?;
    tx.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(&staging),
        quote_ident(table_name)
    ))?;
    tx.commit()?;

    Ok(LoadReport {
        table: table_name.to_string(),
        rows_written: batch.num_rows(),
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(data_type: &DataType) -> Result<&'static str> {
    match data_type {
        DataType::Utf8 => Ok("TEXT"),
        DataType::Int64 => Ok("INTEGER"),
        DataType::Float64 => Ok("REAL"),
        DataType::Timestamp(TimeUnit::Millisecond, None) => Ok("TIMESTAMP"),
        other => Err(PipelineError::Load(format!(
            "no SQL type for column type {other}"
        ))),
    }
}

fn create_table_sql(table: &str, schema: &Schema) -> Result<String> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| Ok(format!("{} {}", quote_ident(field.name()), sql_type(field.data_type())?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_ident(table),
        columns.join(", ")
    ))
}

fn insert_sql(table: &str, schema: &Schema) -> String {
    let names: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| quote_ident(field.name()))
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        PipelineError::Load(format!("column has unexpected type {}", array.data_type()))
    })
}

fn sql_value(array: &ArrayRef, row: usize) -> Result<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    Ok(match array.data_type() {
        DataType::Utf8 => Value::Text(downcast::<StringArray>(array)?.value(row).to_string()),
        DataType::Int64 => Value::Integer(downcast::<Int64Array>(array)?.value(row)),
        DataType::Float64 => Value::Real(downcast::<Float64Array>(array)?.value(row)),
        DataType::Timestamp(TimeUnit::Millisecond, None) => {
            let millis = downcast::<TimestampMillisecondArray>(array)?.value(row);
            let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                PipelineError::Load(format!("timestamp out of range: {millis}"))
            })?;
            Value::Text(timestamp.format(TIMESTAMP_FORMAT).to_string())
        }
        other => {
            return Err(PipelineError::Load(format!(
                "no SQL value for column type {other}"
            )));
        }
    })
}
