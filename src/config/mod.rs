//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

mod cli;

pub use cli::{
    CliArgs, Command, GlobalOverrides, KeysArgs, PurgeArgs, PurgeTagArgs, ShowArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "render-cache";
const ENV_PREFIX: &str = "RENDER_CACHE";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: CacheConfig,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(directory) = overrides.cache_dir.as_ref() {
            self.cache.directory = directory.clone();
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { cache, logging } = raw;

        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self { cache, logging })
    }
}

fn build_cache_settings(cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    if cache.render_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.render_timeout_ms",
            "must be greater than zero",
        ));
    }
    if cache.directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.directory", "must not be empty"));
    }
    Ok(cache)
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.cache, CacheConfig::default());
        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.cache.directory = PathBuf::from("/from/file");
        raw.logging.level = Some("info".to_string());

        let overrides = GlobalOverrides {
            cache_dir: Some(PathBuf::from("/from/cli")),
            log_level: Some("debug".to_string()),
            log_json: Some(true),
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.cache.directory, PathBuf::from("/from/cli"));
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_render_timeout_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.render_timeout_ms = 0;

        match Settings::from_raw(raw) {
            Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "cache.render_timeout_ms"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "logging.level",
                ..
            })
        ));
    }

    #[test]
    fn cache_table_deserializes_from_toml_source() {
        let raw: RawSettings = Config::builder()
            .add_source(config::File::from_str(
                "[cache]\nbackend = \"disk\"\nstale_grace_seconds = 30\nmemory_capacity = 0\n",
                config::FileFormat::Toml,
            ))
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize");
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.cache.backend, crate::cache::StoreBackend::Disk);
        assert_eq!(settings.cache.stale_grace_seconds, Some(30));
        assert_eq!(settings.cache.render_timeout_ms, 10_000);
        assert_eq!(settings.cache.memory_capacity_non_zero().get(), 1);
    }

    #[test]
    fn parse_keys_with_prefix() {
        let args = CliArgs::parse_from(["render-cache", "keys", "--prefix", "/posts"]);
        match args.command {
            Command::Keys(keys) => assert_eq!(keys.prefix, "/posts"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_show_with_global_overrides_after_subcommand() {
        let args = CliArgs::parse_from([
            "render-cache",
            "show",
            "en:/posts/a",
            "--body",
            "--cache-dir",
            "/tmp/cache",
            "--log-json",
            "true",
        ]);

        assert_eq!(args.overrides.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(args.overrides.log_json, Some(true));
        match args.command {
            Command::Show(show) => {
                assert_eq!(show.key, "en:/posts/a");
                assert!(show.body);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_purge_tag() {
        let args = CliArgs::parse_from(["render-cache", "purge-tag", "posts"]);
        assert!(matches!(args.command, Command::PurgeTag(PurgeTagArgs { ref tag }) if tag == "posts"));
    }
}
