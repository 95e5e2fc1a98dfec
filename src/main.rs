use clap::Parser;
use lib::structs::emit;
use lib::{PipelineError, RunLogger, process_env, resolve, run};
use log::{Level, LevelFilter, Log};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file with file_path, db_url and table_name (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file, appended to on every run
    #[arg(long, default_value = "etl_log.log")]
    log_file: PathBuf,

    /// Log level for output
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() -> Result<(), PipelineError> {
    let total_start = Instant::now();
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = RunLogger::with_file(&args.log_file, level)?;

    let outcome = resolve(args.config.as_deref(), process_env, &logger)
        .and_then(|config| run(&config, &logger));

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            emit(
                &logger,
                Level::Error,
                format_args!("ETL run failed in {} stage: {}", e.stage(), e),
            );
            logger.flush();
            return Err(e);
        }
    };
    logger.flush();

    println!(
        "Pipeline completed successfully in {:.2?} | {} of {} rows loaded into {}",
        total_start.elapsed(),
        summary.rows_loaded,
        summary.rows_extracted,
        summary.table
    );
    Ok(())
}
