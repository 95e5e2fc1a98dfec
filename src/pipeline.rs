use crate::error::Result;
use crate::extract::extract;
use crate::load::load;
use crate::structs::{RunConfig, emit};
use crate::transform::transform;
use log::{Level, Log};

/// Row counts for a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub table: String,
    pub rows_extracted: usize,
    pub rows_loaded: usize,
}

/// Runs extract, transform and load in sequence.
///
/// Each stage consumes the previous stage's full output. The first failing
/// stage ends the run; nothing is written unless every validation gate passed.
///
/// # Arguments
/// * `config` - Resolved run configuration
/// * `logger` - Logger handed to every stage
///
/// # Returns
/// Returns a `RunSummary` with extracted and loaded row counts.
///
/// # Errors
/// Returns the failing stage's `PipelineError` unchanged.
pub fn run(config: &RunConfig, logger: &dyn Log) -> Result<RunSummary> {
    emit(
        logger,
        Level::Debug,
        format_args!(
            "Run config | file_path={} table_name={}",
            config.file_path.display(),
            config.table_name
        ),
    );

    let raw = extract(&config.file_path, logger)?;
    let rows_extracted = raw.num_rows();
    let cleaned = transform(raw, logger)?;
    let report = load(&cleaned, &config.db_url, &config.table_name, logger)?;

    Ok(RunSummary {
        table: report.table,
        rows_extracted,
        rows_loaded: report.rows_written,
    })
}
