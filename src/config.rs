use crate::error::{PipelineError, Result};
use crate::structs::{RunConfig, emit};
use log::{Level, Log};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DB_URL_VAR: &str = "DB_URL";
pub const DB_USER_VAR: &str = "DB_USER";
pub const DB_PASS_VAR: &str = "DB_PASS";

/// Keys recognized in the YAML config file. Anything else is ignored.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    file_path: Option<PathBuf>,
    db_url: Option<String>,
    table_name: Option<String>,
}

/// Reads the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolves the run configuration.
///
/// With a config file, its keys win and missing keys fall back to defaults.
/// Without one, `db_url` comes from `DB_URL` and everything else is default.
/// Credential placeholders in `db_url` are rendered in both cases.
///
/// # Errors
/// Returns `PipelineError::Config` if the file cannot be read or parsed, if
/// `DB_USER`/`DB_PASS` are unset, or if the table name is empty.
pub fn resolve<F>(config_path: Option<&Path>, env: F, logger: &dyn Log) -> Result<RunConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match config_path {
        Some(path) => load_config_file(path, logger)?,
        None => {
            let defaults = RunConfig::default();
            RunConfig {
                db_url: env(DB_URL_VAR).unwrap_or(defaults.db_url),
                ..defaults
            }
        }
    };

    config.db_url = match substitute_credentials(&config.db_url, &env) {
        Ok(url) => url,
        Err(e) => {
            emit(logger, Level::Error, format_args!("{e}"));
            return Err(e);
        }
    };

    if config.table_name.trim().is_empty() {
        let err = PipelineError::Config("table_name must not be empty".to_string());
        emit(logger, Level::Error, format_args!("{err}"));
        return Err(err);
    }

    Ok(config)
}

/// Loads a YAML config file, filling missing keys with defaults.
///
/// # Errors
/// Returns `PipelineError::Config` if the file cannot be read or is not valid YAML.
pub fn load_config_file(path: &Path, logger: &dyn Log) -> Result<RunConfig> {
    let parsed = fs::read_to_string(path)
        .map_err(|e| {
            PipelineError::Config(format!("cannot read config file {}: {e}", path.display()))
        })
        .and_then(|content| parse_config(&content));

    match parsed {
        Ok(config) => {
            emit(logger, Level::Info, format_args!("Configuration loaded successfully"));
            Ok(config)
        }
        Err(e) => {
            emit(
                logger,
                Level::Error,
                format_args!("Error loading configuration file: {e}"),
            );
            Err(e)
        }
    }
}

fn parse_config(content: &str) -> Result<RunConfig> {
    let file: ConfigFile = if content.trim().is_empty() {
        ConfigFile::default()
    } else {
        serde_yaml::from_str::<Option<ConfigFile>>(content)?.unwrap_or_default()
    };
    let defaults = RunConfig::default();
    Ok(RunConfig {
        file_path: file.file_path.unwrap_or(defaults.file_path),
        db_url: file.db_url.unwrap_or(defaults.db_url),
        table_name: file.table_name.unwrap_or(defaults.table_name),
    })
}

/// Renders `${DB_USER}` and `${DB_PASS}` inside a connection string.
///
/// Both variables are required even when the template does not reference them.
///
/// # Errors
/// Returns `PipelineError::Config` naming the first missing variable.
pub fn substitute_credentials<F>(template: &str, env: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let user = env(DB_USER_VAR).ok_or_else(|| missing_var(DB_USER_VAR))?;
    let pass = env(DB_PASS_VAR).ok_or_else(|| missing_var(DB_PASS_VAR))?;
    Ok(render(
        template,
        &[(DB_USER_VAR, user.as_str()), (DB_PASS_VAR, pass.as_str())],
    ))
}

fn missing_var(name: &str) -> PipelineError {
    PipelineError::Config(format!("environment variable {name} is not set"))
}

/// Single left-to-right pass over `${NAME}` tokens. Substituted text is never
/// rescanned; unknown or unterminated tokens are copied through literally.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{DEFAULT_DB_URL, DEFAULT_FILE_PATH, DEFAULT_TABLE_NAME, MemoryLogger};
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn creds() -> Vec<(&'static str, &'static str)> {
        vec![(DB_USER_VAR, "alice"), (DB_PASS_VAR, "s3cret")]
    }

    #[test]
    fn defaults_without_config_file() {
        let logger = MemoryLogger::new();
        let config = resolve(None, env_from(&creds()), &logger).unwrap();
        assert_eq!(config.file_path, PathBuf::from(DEFAULT_FILE_PATH));
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
    }

    #[test]
    fn db_url_from_environment() {
        let mut vars = creds();
        vars.push((DB_URL_VAR, "sqlite://${DB_USER}:${DB_PASS}@/tmp/x.db"));
        let logger = MemoryLogger::new();
        let config = resolve(None, env_from(&vars), &logger).unwrap();
        assert_eq!(config.db_url, "sqlite://alice:s3cret@/tmp/x.db");
    }

    #[test]
    fn config_file_keys_and_fallbacks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "file_path: input/sales.csv").unwrap();
        writeln!(file, "extra_key: ignored").unwrap();
        let logger = MemoryLogger::new();

        let config = resolve(Some(file.path()), env_from(&creds()), &logger).unwrap();
        assert_eq!(config.file_path, PathBuf::from("input/sales.csv"));
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        assert!(logger.contains(Level::Info, "Configuration loaded"));
    }

    #[test]
    fn config_file_ignores_db_url_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "table_name: ledger").unwrap();
        let mut vars = creds();
        vars.push((DB_URL_VAR, "sqlite://from-env.db"));
        let logger = MemoryLogger::new();

        let config = resolve(Some(file.path()), env_from(&vars), &logger).unwrap();
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.table_name, "ledger");
    }

    #[test]
    fn empty_config_file_uses_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let logger = MemoryLogger::new();
        let config = resolve(Some(file.path()), env_from(&creds()), &logger).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn unreadable_config_file_is_config_error() {
        let logger = MemoryLogger::new();
        let err = resolve(
            Some(Path::new("/definitely/not/here.yaml")),
            env_from(&creds()),
            &logger,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(logger.contains(Level::Error, "Error loading configuration file"));
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "table_name: [unclosed").unwrap();
        let logger = MemoryLogger::new();
        let err = resolve(Some(file.path()), env_from(&creds()), &logger).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let logger = MemoryLogger::new();
        let err = resolve(None, env_from(&[(DB_USER_VAR, "alice")]), &logger).unwrap_err();
        match err {
            PipelineError::Config(msg) => assert!(msg.contains(DB_PASS_VAR)),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = substitute_credentials("sqlite://x.db", env_from(&[])).unwrap_err();
        match err {
            PipelineError::Config(msg) => assert!(msg.contains(DB_USER_VAR)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_table_name_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "table_name: \"\"").unwrap();
        let logger = MemoryLogger::new();
        let err = resolve(Some(file.path()), env_from(&creds()), &logger).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let env = env_from(&[(DB_USER_VAR, "${DB_PASS}"), (DB_PASS_VAR, "pw")]);
        let url = substitute_credentials("sqlite://${DB_USER}@/db", env).unwrap();
        assert_eq!(url, "sqlite://${DB_PASS}@/db");
    }

    #[test]
    fn unknown_and_unterminated_tokens_stay_literal() {
        let vars = [(DB_USER_VAR, "u"), (DB_PASS_VAR, "p")];
        assert_eq!(render("a${HOME}b${DB_USER}", &vars), "a${HOME}bu");
        assert_eq!(render("x${DB_PASS", &vars), "x${DB_PASS");
        assert_eq!(render("$DB_USER", &vars), "$DB_USER");
    }
}
