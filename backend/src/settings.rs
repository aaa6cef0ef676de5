//! Runtime settings read from the environment (and `.env` when present).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE: &str = ".dofusdb/ingest.sqlite";
const DEFAULT_LANG: &str = "fr";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: usize = 50;

/// Settings shared by the CLI and the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root of the `<source>/source.json` + `<source>/entities/*.json` tree
    pub config_dir: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Language picked out of multi-language raw strings
    pub lang: String,
    pub http_timeout: Duration,
    /// Page size used by collection when neither caller nor entity config sets one
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            database: PathBuf::from(DEFAULT_DATABASE),
            lang: DEFAULT_LANG.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Settings {
    /// Load settings from `DOFUSDB_*` environment variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            config_dir: lookup("DOFUSDB_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_dir),
            database: lookup("DOFUSDB_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database),
            lang: lookup("DOFUSDB_LANG")
                .filter(|l| !l.trim().is_empty())
                .unwrap_or(defaults.lang),
            http_timeout: Duration::from_secs(parse_or(
                "DOFUSDB_HTTP_TIMEOUT_SECS",
                lookup("DOFUSDB_HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            page_size: parse_or(
                "DOFUSDB_PAGE_SIZE",
                lookup("DOFUSDB_PAGE_SIZE"),
                DEFAULT_PAGE_SIZE,
            )
            .max(1),
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, default = %default, "invalid setting, using default");
            default
        }),
    }
}
