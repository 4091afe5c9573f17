use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the render-cache maintenance binary.
#[derive(Debug, Parser)]
#[command(
    name = "render-cache",
    version,
    about = "Inspect and invalidate an on-disk render cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "RENDER_CACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the cache directory.
    #[arg(
        long = "cache-dir",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub cache_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List cached keys.
    Keys(KeysArgs),
    /// Show metadata and freshness of one entry.
    Show(ShowArgs),
    /// Delete a single key.
    Purge(PurgeArgs),
    /// Delete every key carrying a tag.
    #[command(name = "purge-tag")]
    PurgeTag(PurgeTagArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct KeysArgs {
    /// Only list keys starting with this prefix.
    #[arg(long, value_name = "PREFIX", default_value = "")]
    pub prefix: String,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// Exact cache key.
    #[arg(value_name = "KEY")]
    pub key: String,

    /// Also print the stored body.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub body: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// Exact cache key.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeTagArgs {
    #[arg(value_name = "TAG")]
    pub tag: String,
}
