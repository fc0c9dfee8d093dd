use std::path::Path;
use std::time::Duration;

use crate::error::Error;
use crate::grammar::OUTLINE_LANGUAGES;
use crate::hasher::{DEFAULT_DRIFT_RADIUS, DriftTieBreak};
use crate::retry::RetryPolicy;

/// Name of the project configuration file at the workspace root.
pub const CONFIG_FILE: &str = ".ghostmark.toml";

/// Project configuration loaded from `.ghostmark.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Language ids symbol anchoring is enabled for.
    pub ast_languages: Vec<String>,
    /// Debounce delay before a changed comment file is written.
    pub auto_save_delay: Duration,
    /// Backups kept per comment file.
    pub backups_to_keep: usize,
    /// Author recorded when none is given.
    pub default_author: String,
    /// Lines searched either side of a marker's recorded line.
    pub drift_radius: u32,
    /// Preference among several drift matches.
    pub drift_tie_break: DriftTieBreak,
    /// Comment files held in memory at once.
    pub max_cached_files: usize,
    /// Backoff for transient I/O and symbol query failures.
    pub retry: RetryPolicy,
    /// Maximum age of a cached symbol outline.
    pub symbol_cache_ttl: Duration,
}

/// Raw TOML structure for `.ghostmark.toml`.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct GhostmarkTomlConfig {
    /// See [`Config::ast_languages`].
    ast_languages: Option<Vec<String>>,
    /// Milliseconds; see [`Config::auto_save_delay`].
    auto_save_delay_ms: Option<u64>,
    /// See [`Config::backups_to_keep`].
    backups_to_keep: Option<usize>,
    /// See [`Config::default_author`].
    default_author: Option<String>,
    /// See [`Config::drift_radius`].
    drift_radius: Option<u32>,
    /// See [`Config::drift_tie_break`].
    drift_tie_break: Option<DriftTieBreak>,
    /// See [`Config::max_cached_files`].
    max_cached_files: Option<usize>,
    /// The `[retry]` table.
    #[serde(default)]
    retry: RetryTomlConfig,
    /// Milliseconds; see [`Config::symbol_cache_ttl`].
    symbol_cache_ttl_ms: Option<u64>,
}

/// Raw `[retry]` table.
#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryTomlConfig {
    /// Wait before the second attempt, in milliseconds.
    base_delay_ms: Option<u64>,
    /// Backoff multiplier.
    factor: Option<u32>,
    /// Total attempts.
    max_attempts: Option<u32>,
    /// Ceiling on a single wait, in milliseconds.
    max_delay_ms: Option<u64>,
}

impl Config {
    /// Load config from `.ghostmark.toml` in the given root directory.
    /// Returns defaults if the file doesn't exist. Returns an error if the
    /// file exists but is malformed; a config the user wrote is never
    /// silently replaced by defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// or `Error::TomlDe` if the TOML is malformed or has unknown keys.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Io(e)),
        };
        return Self::parse(&content);
    }

    /// Parse config text, filling unset keys with defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the TOML is malformed or has unknown keys.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let raw: GhostmarkTomlConfig = toml::from_str(content)?;
        let defaults = Self::default();
        let retry = RetryPolicy {
            base_delay: raw.retry.base_delay_ms.map_or(defaults.retry.base_delay, Duration::from_millis),
            factor: raw.retry.factor.unwrap_or(defaults.retry.factor),
            max_attempts: raw.retry.max_attempts.unwrap_or(defaults.retry.max_attempts).max(1),
            max_delay: raw.retry.max_delay_ms.map_or(defaults.retry.max_delay, Duration::from_millis),
        };
        return Ok(Self {
            ast_languages: raw.ast_languages.unwrap_or(defaults.ast_languages),
            auto_save_delay: raw.auto_save_delay_ms.map_or(defaults.auto_save_delay, Duration::from_millis),
            backups_to_keep: raw.backups_to_keep.unwrap_or(defaults.backups_to_keep),
            default_author: raw.default_author.unwrap_or(defaults.default_author),
            drift_radius: raw.drift_radius.unwrap_or(defaults.drift_radius),
            drift_tie_break: raw.drift_tie_break.unwrap_or(defaults.drift_tie_break),
            max_cached_files: raw.max_cached_files.unwrap_or(defaults.max_cached_files).max(1),
            retry,
            symbol_cache_ttl: raw.symbol_cache_ttl_ms.map_or(defaults.symbol_cache_ttl, Duration::from_millis),
        });
    }
}

impl Default for Config {
    /// Two-second auto-save, 100 cached files, radius 10, nearest tie-break,
    /// five-second outline TTL, five backups, every outline language.
    fn default() -> Self {
        return Self {
            ast_languages: OUTLINE_LANGUAGES.iter().map(|l| return (*l).to_string()).collect(),
            auto_save_delay: Duration::from_millis(2000),
            backups_to_keep: 5,
            default_author: "anonymous".to_string(),
            drift_radius: DEFAULT_DRIFT_RADIUS,
            drift_tie_break: DriftTieBreak::default(),
            max_cached_files: 100,
            retry: RetryPolicy::default(),
            symbol_cache_ttl: Duration::from_millis(5000),
        };
    }
}
