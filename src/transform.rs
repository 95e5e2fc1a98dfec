use crate::error::{PipelineError, Result};
use crate::structs::emit;
use arrow_array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use arrow_select::filter::filter_record_batch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{Level, Log};
use std::sync::Arc;

pub const DATE_COLUMN: &str = "date";
pub const AMOUNT_COLUMN: &str = "amount";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Coerces and validates the extracted batch.
///
/// `date` becomes a millisecond timestamp and `amount` a `Float64`. Three gates
/// then run in order over the full coerced batch:
///
/// 1. any null `date` or `amount` fails the batch
/// 2. any negative `amount` fails the batch
/// 3. rows with a null in any other column are dropped
///
/// Values that are present but cannot be parsed fail immediately; they are
/// never turned into nulls.
///
/// # Arguments
/// * `batch` - Extracted batch containing at least `date` and `amount`
/// * `logger` - Destination for stage start/success/error lines
///
/// # Returns
/// Returns a new `RecordBatch` with the same column order, `date` as
/// `Timestamp(Millisecond)` and `amount` as `Float64`, minus dropped rows.
///
/// # Errors
///
/// Returns `PipelineError` if:
/// - `Validation`: a required column is missing, or gate 1 or 2 trips
/// - `TypeCoercion`: a `date` or `amount` value cannot be parsed
pub fn transform(batch: RecordBatch, logger: &dyn Log) -> Result<RecordBatch> {
    emit(logger, Level::Info, format_args!("Starting data transformation"));

    let input_rows = batch.num_rows();
    match coerce_and_validate(batch) {
        Ok(cleaned) => {
            emit(
                logger,
                Level::Info,
                format_args!(
                    "Data transformation completed successfully | kept {} rows, dropped {}",
                    cleaned.num_rows(),
                    input_rows - cleaned.num_rows()
                ),
            );
            Ok(cleaned)
        }
        Err(e) => {
            match &e {
                PipelineError::Validation(_) | PipelineError::TypeCoercion { .. } => {
                    emit(logger, Level::Error, format_args!("Value error: {e}"))
                }
                _ => emit(
                    logger,
                    Level::Error,
                    format_args!("Error during data transformation: {e}"),
                ),
            }
            Err(e)
        }
    }
}

fn coerce_and_validate(batch: RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let date_idx = column_index(&schema, DATE_COLUMN)?;
    let amount_idx = column_index(&schema, AMOUNT_COLUMN)?;

    let dates = coerce_dates(batch.column(date_idx))?;
    let amounts = coerce_amounts(batch.column(amount_idx))?;

    if dates.null_count() > 0 || amounts.null_count() > 0 {
        return Err(PipelineError::Validation(
            "null values after transformation".to_string(),
        ));
    }
    if amounts.iter().flatten().any(|amount| amount < 0.0) {
        return Err(PipelineError::Validation("negative amount".to_string()));
    }
    let dates: ArrayRef = Arc::new(dates);
    let amounts: ArrayRef = Arc::new(amounts);

    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (i, field) in schema.fields().iter().enumerate() {
        if i == date_idx {
            fields.push(Field::new(
                DATE_COLUMN,
                DataType::Timestamp(TimeUnit::Millisecond, None),
                true,
            ));
            columns.push(dates.clone());
        } else if i == amount_idx {
            fields.push(Field::new(AMOUNT_COLUMN, DataType::Float64, true));
            columns.push(amounts.clone());
        } else {
            fields.push((**field).clone());
            columns.push(batch.column(i).clone());
        }
    }
    let coerced = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    drop_incomplete_rows(coerced)
}

fn column_index(schema: &Schema, name: &str) -> Result<usize> {
    schema
        .index_of(name)
        .map_err(|_| PipelineError::Validation(format!("missing required column: {}", name)))
}

/// Downcasts an array to its concrete type.
fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        PipelineError::Validation(format!(
            "column has unexpected type {}",
            array.data_type()
        ))
    })
}

/// String form of every non-null value, for columns that need text parsing.
fn text_values(array: &ArrayRef) -> Result<Vec<Option<String>>> {
    Ok(match array.data_type() {
        DataType::Utf8 => downcast::<StringArray>(array)?
            .iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        DataType::Int64 => downcast::<Int64Array>(array)?
            .iter()
            .map(|v| v.map(|n| n.to_string()))
            .collect(),
        DataType::Float64 => downcast::<Float64Array>(array)?
            .iter()
            .map(|v| v.map(|n| n.to_string()))
            .collect(),
        other => {
            return Err(PipelineError::Validation(format!(
                "column has unsupported type {other}"
            )));
        }
    })
}

fn coerce_dates(array: &ArrayRef) -> Result<TimestampMillisecondArray> {
    text_values(array)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            None => Ok(None),
            Some(text) => parse_datetime(&text)
                .map(|dt| Some(dt.and_utc().timestamp_millis()))
                .ok_or_else(|| coercion_error(DATE_COLUMN, row, text)),
        })
        .collect()
}

/// Parses the date/time layouts found in typical exports.
///
/// RFC 3339 values carrying an offset are normalized to UTC.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn coerce_amounts(array: &ArrayRef) -> Result<Float64Array> {
    match array.data_type() {
        DataType::Float64 => downcast::<Float64Array>(array)?
            .iter()
            .enumerate()
            .map(|(row, value)| check_amount(row, value))
            .collect(),
        DataType::Int64 => Ok(downcast::<Int64Array>(array)?
            .iter()
            .map(|value| value.map(|n| n as f64))
            .collect()),
        DataType::Utf8 => downcast::<StringArray>(array)?
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                None => Ok(None),
                Some(text) => text
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| coercion_error(AMOUNT_COLUMN, row, text.to_string()))
                    .and_then(|amount| check_amount(row, Some(amount))),
            })
            .collect(),
        other => Err(PipelineError::Validation(format!(
            "column {AMOUNT_COLUMN} has unsupported type {other}"
        ))),
    }
}

/// NaN counts as missing; infinities are not valid amounts.
fn check_amount(row: usize, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(amount) if amount.is_nan() => Ok(None),
        Some(amount) if amount.is_infinite() => {
            Err(coercion_error(AMOUNT_COLUMN, row, amount.to_string()))
        }
        other => Ok(other),
    }
}

fn coercion_error(column: &str, row: usize, value: String) -> PipelineError {
    PipelineError::TypeCoercion {
        column: column.to_string(),
        row: row + 1,
        value,
    }
}

/// Keeps only rows where every column is non-null.
fn drop_incomplete_rows(batch: RecordBatch) -> Result<RecordBatch> {
    let mask: BooleanArray = (0..batch.num_rows())
        .map(|row| Some(batch.columns().iter().all(|column| column.is_valid(row))))
        .collect();
    if mask.true_count() == batch.num_rows() {
        return Ok(batch);
    }
    Ok(filter_record_batch(&batch, &mask)?)
}
