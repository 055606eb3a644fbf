use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::{Config as RawConfig, Environment as EnvSource, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
pub const CONFIGURATION_DIR: &str = "configuration";

/// File extensions tried, in order, for every configuration file.
const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variables overriding file values, e.g. `APP_SYNC__RECORDS_PER_HEARTBEAT`.
const ENV_PREFIX: &str = "APP";

/// Separator for nested keys in environment variables.
const ENV_KEY_SEPARATOR: &str = "__";

/// Separator of list values in environment variables.
const ENV_LIST_SEPARATOR: &str = ",";

/// Implemented by top level configuration types loaded through [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split into lists on [`ENV_LIST_SEPARATOR`].
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no `{stem}` configuration file found in `{directory}` (tried {tried})")]
    MissingFile {
        stem: String,
        directory: PathBuf,
        tried: String,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to build configuration: {0}")]
    Build(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[source] rust_cli_config::ConfigError),
}

/// Loads `T` from `./configuration` using the environment named by `APP_ENVIRONMENT`.
///
/// `base.*` is loaded first, then `{environment}.*`, then `APP_`-prefixed environment
/// variables. Later sources override earlier ones.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&directory, environment)
}

/// Loads `T` from an explicit configuration directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let base_file = find_file(directory, "base")?;
    let environment_file = find_file(directory, environment.as_str())?;

    let settings = RawConfig::builder()
        .add_source(File::from(base_file))
        .add_source(File::from(environment_file))
        .add_source(env_source::<T>())
        .build()
        .map_err(LoadConfigError::Build)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialize)
}

fn env_source<T: Config>() -> EnvSource {
    let mut source = EnvSource::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_KEY_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        source = source.try_parsing(true).list_separator(ENV_LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}

fn find_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }

    let tried = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::MissingFile {
        stem: stem.to_owned(),
        directory: directory.to_path_buf(),
        tried,
    })
}
