use crate::error::{PipelineError, Result};
use crate::structs::emit;
use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use csv::{ReaderBuilder, Trim};
use log::{Level, Log};
use std::collections::HashSet;
use std::{fs::File, io, path::Path, sync::Arc};

/// Field values read as null, matched after trimming.
const NA_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "null", "NULL", "None", "#N/A", "<NA>",
];

/// Options for reading the delimited source
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub delimiter: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

/// Reads a comma-delimited file with a header row into a `RecordBatch`.
///
/// # Errors
/// See [`extract_with`].
pub fn extract(file_path: &Path, logger: &dyn Log) -> Result<RecordBatch> {
    extract_with(file_path, &ExtractOptions::default(), logger)
}

/// Reads a delimited file into a `RecordBatch`, one row per non-header line.
///
/// Column names come from the header line. Each column gets the narrowest of
/// `Int64`, `Float64` or `Utf8` that fits all of its non-null values; NA
/// tokens and empty fields become nulls.
///
/// # Arguments
/// * `file_path` - Path to the delimited source file
/// * `options` - Reader options (delimiter)
/// * `logger` - Destination for stage start/success/error lines
///
/// # Returns
/// Returns a `RecordBatch` with one nullable column per header field, in header order.
///
/// # Errors
///
/// Returns `PipelineError` if:
/// - `NotFound`: the path does not exist
/// - `EmptyInput`: there is no header, or the header is followed by no rows
/// - `Extraction`: ragged rows, invalid UTF-8, blank or duplicate header names
pub fn extract_with(
    file_path: &Path,
    options: &ExtractOptions,
    logger: &dyn Log,
) -> Result<RecordBatch> {
    emit(
        logger,
        Level::Info,
        format_args!("Starting data extraction from {}", file_path.display()),
    );

    match read_batch(file_path, options) {
        Ok(batch) => {
            emit(
                logger,
                Level::Info,
                format_args!(
                    "Data extraction completed successfully | {} rows, {} columns",
                    batch.num_rows(),
                    batch.num_columns()
                ),
            );
            Ok(batch)
        }
        Err(e) => {
            match &e {
                PipelineError::NotFound(_) => {
                    emit(logger, Level::Error, format_args!("{e}"))
                }
                PipelineError::EmptyInput(_) => {
                    emit(logger, Level::Error, format_args!("Empty data error: {e}"))
                }
                _ => emit(
                    logger,
                    Level::Error,
                    format_args!("Error during data extraction: {e}"),
                ),
            }
            Err(e)
        }
    }
}

fn read_batch(file_path: &Path, options: &ExtractOptions) -> Result<RecordBatch> {
    let file = File::open(file_path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::NotFound(file_path.to_path_buf()),
        _ => PipelineError::Extraction(format!("cannot open {}: {e}", file_path.display())),
    })?;

    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(file);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(PipelineError::EmptyInput(
            "no columns to parse from file".to_string(),
        ));
    }
    check_headers(&headers)?;

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (column, value) in columns.iter_mut().zip(record.iter()) {
            column.push(normalize(value));
        }
    }

    if columns[0].is_empty() {
        return Err(PipelineError::EmptyInput(format!(
            "{} has a header but no rows",
            file_path.display()
        )));
    }

    let fields: Vec<Field> = headers
        .iter()
        .zip(&columns)
        .map(|(name, values)| Field::new(name, infer_type(values), true))
        .collect();
    let arrays: Vec<ArrayRef> = fields
        .iter()
        .zip(&columns)
        .map(|(field, values)| build_array(field.data_type(), values))
        .collect();

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| PipelineError::Extraction(e.to_string()))
}

fn check_headers(headers: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, name) in headers.iter().enumerate() {
        if name.is_empty() {
            return Err(PipelineError::Extraction(format!(
                "header column {} has no name",
                i + 1
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(PipelineError::Extraction(format!(
                "duplicate header column: {name}"
            )));
        }
    }
    Ok(())
}

fn normalize(value: &str) -> Option<String> {
    if NA_TOKENS.contains(&value) {
        None
    } else {
        Some(value.to_string())
    }
}

fn infer_type(values: &[Option<String>]) -> DataType {
    if values.iter().all(Option::is_none) {
        return DataType::Utf8;
    }
    if values.iter().flatten().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if values.iter().flatten().all(|v| v.parse::<f64>().is_ok()) {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

fn build_array(data_type: &DataType, values: &[Option<String>]) -> ArrayRef {
    match data_type {
        DataType::Int64 => Arc::new(
            values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.parse::<i64>().ok()))
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            values
                .iter()
                .map(|v| v.as_deref().and_then(|s| s.parse::<f64>().ok()))
                .collect::<Float64Array>(),
        ),
        _ => Arc::new(values.iter().map(|v| v.as_deref()).collect::<StringArray>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::MemoryLogger;
    use arrow_array::Array;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_header_and_rows_with_inferred_types() {
        let file = csv_file("date,amount,qty,memo\n2024-01-01,10.50,3,coffee\n2024-01-02,20,4,\n");
        let logger = MemoryLogger::new();
        let batch = extract(file.path(), &logger).unwrap();

        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["date", "amount", "qty", "memo"]);
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Int64);
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
        assert!(batch.column(3).is_null(1));

        assert!(logger.contains(Level::Info, "Starting data extraction"));
        assert!(logger.contains(Level::Info, "completed successfully"));
    }

    #[test]
    fn na_tokens_become_nulls() {
        let file = csv_file("date,amount\n2024-01-01, NA \nnull,5\n");
        let batch = extract(file.path(), &MemoryLogger::new()).unwrap();
        assert!(batch.column(1).is_null(0));
        assert!(batch.column(0).is_null(1));
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Int64);
    }

    #[test]
    fn custom_delimiter() {
        let file = csv_file("date;amount\n2024-01-01;1.5\n");
        let options = ExtractOptions { delimiter: b';' };
        let batch = extract_with(file.path(), &options, &MemoryLogger::new()).unwrap();
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let logger = MemoryLogger::new();
        let err = extract(Path::new("/no/such/input.csv"), &logger).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(logger.contains(Level::Error, "File not found"));
        assert!(!logger.contains(Level::Info, "completed successfully"));
    }

    #[test]
    fn empty_file_and_header_only_are_empty_input() {
        let logger = MemoryLogger::new();
        let empty = csv_file("");
        assert!(matches!(
            extract(empty.path(), &logger),
            Err(PipelineError::EmptyInput(_))
        ));

        let header_only = csv_file("date,amount\n");
        assert!(matches!(
            extract(header_only.path(), &logger),
            Err(PipelineError::EmptyInput(_))
        ));
        assert!(logger.contains(Level::Error, "Empty data error"));
    }

    #[test]
    fn ragged_rows_are_extraction_errors() {
        let file = csv_file("date,amount\n2024-01-01,1,extra\n");
        let logger = MemoryLogger::new();
        let err = extract(file.path(), &logger).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
        assert!(logger.contains(Level::Error, "Error during data extraction"));
    }

    #[test]
    fn invalid_utf8_is_extraction_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"date,amount\n2024-01-01,\xff\xfe\n").unwrap();
        let err = extract(file.path(), &MemoryLogger::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let file = csv_file("date,amount,amount\n2024-01-01,1,2\n");
        let err = extract(file.path(), &MemoryLogger::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }
}
