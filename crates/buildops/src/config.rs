use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const CONFIG_PATH_ENV_VAR: &str = "BUILDOPS_CONFIG";
pub const TILES_PER_TICK_ENV_VAR: &str = "BUILDOPS_TILES_PER_TICK";
pub const MAX_SELECTION_SIZE_ENV_VAR: &str = "BUILDOPS_MAX_SELECTION_SIZE";
pub const DEFAULT_CONFIG_FILE: &str = "buildops.json";

pub const TILES_PER_TICK_RANGE: (u32, u32) = (1, 2000);
pub const MAX_SELECTION_SIZE_RANGE: (u32, u32) = (100, 50_000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse config json at {json_path}: {message}")]
    Parse { json_path: String, message: String },
    #[error("invalid config '{path}': {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Server-side builder tuning. Missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderSettings {
    pub tiles_per_tick: u32,
    pub max_selection_size: u32,
    pub selection_particles: bool,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            tiles_per_tick: 64,
            max_selection_size: 10_000,
            selection_particles: true,
        }
    }
}

impl BuilderSettings {
    pub fn parse_json(raw: &str) -> Result<Self, ConfigError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let settings = serde_path_to_error::deserialize::<_, BuilderSettings>(&mut deserializer)
            .map_err(|error| {
                let path = error.path().to_string();
                let json_path = if path.is_empty() { ".".to_string() } else { path };
                ConfigError::Parse {
                    json_path,
                    message: error.into_inner().to_string(),
                }
            })?;
        Ok(settings.clamped())
    }

    /// Pulls each value into its supported range, warning about any value that moved.
    pub fn clamped(self) -> Self {
        Self {
            tiles_per_tick: clamp_field("tiles_per_tick", self.tiles_per_tick, TILES_PER_TICK_RANGE),
            max_selection_size: clamp_field(
                "max_selection_size",
                self.max_selection_size,
                MAX_SELECTION_SIZE_RANGE,
            ),
            selection_particles: self.selection_particles,
        }
    }

    /// Applies `BUILDOPS_*` overrides fetched through `lookup`. Unparseable values are ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_env_u32(TILES_PER_TICK_ENV_VAR, lookup(TILES_PER_TICK_ENV_VAR)) {
            self.tiles_per_tick = value;
        }
        if let Some(value) = parse_env_u32(
            MAX_SELECTION_SIZE_ENV_VAR,
            lookup(MAX_SELECTION_SIZE_ENV_VAR),
        ) {
            self.max_selection_size = value;
        }
        self.clamped()
    }
}

/// Where settings come from, kept around so the host can reload them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSource {
    path: PathBuf,
}

impl SettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Self {
        match std::env::var(CONFIG_PATH_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => Self::new(value),
            _ => Self::new(DEFAULT_CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<BuilderSettings, ConfigError> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// A missing file yields defaults; overrides are applied either way.
    pub fn load_with_env<F>(&self, lookup: F) -> Result<BuilderSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_file = match fs::metadata(&self.path) {
            Ok(metadata) if !metadata.is_file() => {
                return Err(ConfigError::Invalid {
                    path: self.path.clone(),
                    message: "not a regular file".to_string(),
                })
            }
            Ok(_) => {
                let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })?;
                BuilderSettings::parse_json(&raw)?
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "config_missing_using_defaults");
                BuilderSettings::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(from_file.with_env_overrides(lookup))
    }
}

fn clamp_field(field: &'static str, value: u32, (min, max): (u32, u32)) -> u32 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field, value, clamped, min, max, "config_value_clamped");
    }
    clamped
}

fn parse_env_u32(env_var: &'static str, raw: Option<String>) -> Option<u32> {
    let raw = raw?;
    match raw.trim().parse::<u32>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(env_var, value = raw.as_str(), "config_env_override_ignored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_key: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings = BuilderSettings::parse_json(r#"{ "tiles_per_tick": 200 }"#).expect("parse");
        assert_eq!(settings.tiles_per_tick, 200);
        assert_eq!(settings.max_selection_size, 10_000);
        assert!(settings.selection_particles);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let settings = BuilderSettings::parse_json(
            r#"{ "tiles_per_tick": 0, "max_selection_size": 900000 }"#,
        )
        .expect("parse");
        assert_eq!(settings.tiles_per_tick, 1);
        assert_eq!(settings.max_selection_size, 50_000);
    }

    #[test]
    fn parse_error_reports_json_path() {
        let error = BuilderSettings::parse_json(r#"{ "max_selection_size": "lots" }"#)
            .expect_err("type mismatch");
        match error {
            ConfigError::Parse { json_path, .. } => assert_eq!(json_path, "max_selection_size"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(BuilderSettings::parse_json(r#"{ "bogus": 1 }"#).is_err());
    }

    #[test]
    fn env_overrides_apply_and_invalid_values_are_ignored() {
        let env = HashMap::from([
            (TILES_PER_TICK_ENV_VAR, "5000".to_string()),
            (MAX_SELECTION_SIZE_ENV_VAR, "many".to_string()),
        ]);
        let settings =
            BuilderSettings::default().with_env_overrides(|key| env.get(key).cloned());
        assert_eq!(settings.tiles_per_tick, 2000);
        assert_eq!(settings.max_selection_size, 10_000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = SettingsSource::new(dir.path().join("absent.json"));
        assert_eq!(
            source.load_with_env(no_env).expect("load"),
            BuilderSettings::default()
        );
    }

    #[test]
    fn file_is_reread_on_each_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let source = SettingsSource::new(&path);

        fs::write(&path, r#"{ "tiles_per_tick": 16 }"#).expect("write");
        assert_eq!(source.load_with_env(no_env).expect("load").tiles_per_tick, 16);

        fs::write(&path, r#"{ "tiles_per_tick": 32, "selection_particles": false }"#)
            .expect("write");
        let reloaded = source.load_with_env(no_env).expect("reload");
        assert_eq!(reloaded.tiles_per_tick, 32);
        assert!(!reloaded.selection_particles);
    }

    #[test]
    fn directory_path_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = SettingsSource::new(dir.path());
        assert!(matches!(
            source.load_with_env(no_env),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
