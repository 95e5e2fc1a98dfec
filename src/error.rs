use arrow_schema::ArrowError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Empty input: {0}")]
    EmptyInput(String),
    #[error("Extraction Error: {0}")]
    Extraction(String),
    #[error("Validation Error: {0}")]
    Validation(String),
    #[error("Type Coercion Error: column {column} row {row}: cannot parse {value:?}")]
    TypeCoercion {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Load Error: {0}")]
    Load(String),
    #[error("Config Error: {0}")]
    Config(String),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Extraction(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Load(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Name of the stage that produces this kind of error.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_)
            | PipelineError::EmptyInput(_)
            | PipelineError::Extraction(_) => "extract",
            PipelineError::Validation(_)
            | PipelineError::TypeCoercion { .. }
            | PipelineError::Arrow(_) => "transform",
            PipelineError::Load(_) => "load",
            PipelineError::Config(_) | PipelineError::Io(_) => "config",
        }
    }
}
