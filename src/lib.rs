pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod structs;
pub mod transform;

// Re-export public API
pub use config::{process_env, resolve, substitute_credentials};
pub use error::{PipelineError, Result};
pub use extract::{ExtractOptions, extract, extract_with};
pub use load::{load, replace_table};
pub use pipeline::{RunSummary, run};
pub use structs::{LoadReport, MemoryLogger, RunConfig, RunLogger};
pub use transform::transform;
