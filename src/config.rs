//! Config file loading and effective settings.
//!
//! Precedence per setting: command line > environment > config file > default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use ingest_core::catalog::{CatalogOptions, EpisodeMatch, SeriesRefresh};
use ingest_core::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use ingest_core::discovery::{DEFAULT_START_PAGE, ListingPlan};
use ingest_core::extract::{ExtractionRules, PatternExtractor};
use ingest_core::fetch::{HttpSessionConfig, LoginConfig};
use ingest_core::pipeline::{PipelineConfig, ScopeJob};
use ingest_core::retry::RetryPolicy;

use crate::cli::{Args, ExplicitSources};

const CONFIG_DIR_NAME: &str = "catalog-ingest";
const USERNAME_ENV: &str = "INGEST_LOGIN_USERNAME";
const PASSWORD_ENV: &str = "INGEST_LOGIN_PASSWORD";

/// TOML-backed file configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Catalog database path.
    pub database: Option<PathBuf>,
    /// Checkpoint directory.
    pub checkpoint_dir: Option<PathBuf>,
    /// Workers per stage (1..=64).
    pub workers: Option<u8>,
    /// Inter-stage queue capacity (1..=4096).
    pub queue_capacity: Option<u16>,
    /// Attempts per item and session (1..=10).
    pub max_retries: Option<u8>,
    /// Session restarts per item (0..=10).
    pub max_restarts: Option<u8>,
    /// Delay between retries in milliseconds (0..=60000).
    pub retry_delay_ms: Option<u64>,
    /// Lookup cache on or off.
    pub cache: Option<bool>,
    /// Series refresh policy.
    pub series_refresh: Option<SeriesRefresh>,
    /// Episode matching policy.
    pub episode_match: Option<EpisodeMatch>,
    /// Database pool max connections (1..=20).
    pub db_max_connections: Option<u32>,
    /// Database busy timeout in milliseconds (0..=120000).
    pub db_busy_timeout_ms: Option<u32>,
    /// Fetch session settings.
    #[serde(default)]
    pub session: SessionSection,
    /// Crawl scopes, run in file order.
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

/// `[session]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    /// User agent override.
    pub user_agent: Option<String>,
    /// Connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
    /// Form login performed when a session opens.
    pub login: Option<LoginSection>,
}

/// `[session.login]` table. Credentials may come from the environment instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginSection {
    /// Login form URL.
    pub url: String,
    /// Form field for the username.
    #[serde(default = "default_username_field")]
    pub username_field: String,
    /// Form field for the password.
    #[serde(default = "default_password_field")]
    pub password_field: String,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

fn default_username_field() -> String {
    "username".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

/// `[[scopes]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeConfig {
    /// Scope name; also the checkpoint file name.
    pub name: String,
    /// Listing URL with `{page}` and optional `{letter}`.
    pub url_template: String,
    /// Letters for `{letter}`.
    #[serde(default)]
    pub alphabet: Vec<String>,
    /// First listing page.
    #[serde(default)]
    pub start_page: Option<u32>,
    /// Page ceiling per letter.
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Extraction rules.
    pub extract: ExtractionRules,
}

impl ScopeConfig {
    /// The scope's listing plan.
    #[must_use]
    pub fn plan(&self) -> ListingPlan {
        ListingPlan {
            url_template: self.url_template.clone(),
            alphabet: self.alphabet.clone(),
            start_page: self.start_page.unwrap_or(DEFAULT_START_PAGE),
            max_pages: self.max_pages,
        }
    }
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("workers", self.workers.map(u64::from), 1, 64)?;
        validate_range("queue_capacity", self.queue_capacity.map(u64::from), 1, 4096)?;
        validate_range("max_retries", self.max_retries.map(u64::from), 1, 10)?;
        validate_range("max_restarts", self.max_restarts.map(u64::from), 0, 10)?;
        validate_range("retry_delay_ms", self.retry_delay_ms, 0, 60_000)?;
        validate_range("db_max_connections", self.db_max_connections.map(u64::from), 1, 20)?;
        validate_range("db_busy_timeout_ms", self.db_busy_timeout_ms.map(u64::from), 0, 120_000)?;
        validate_range("session.connect_timeout_secs", self.session.connect_timeout_secs, 1, 3600)?;
        validate_range("session.read_timeout_secs", self.session.read_timeout_secs, 1, 3600)?;

        let mut seen = std::collections::HashSet::new();
        for scope in &self.scopes {
            if scope.name.trim().is_empty() {
                bail!("Invalid config value for `scopes.name`: scope names must not be empty");
            }
            if !seen.insert(scope.name.as_str()) {
                bail!("Invalid config value for `scopes.name`: duplicate scope '{}'", scope.name);
            }
            if let Err(message) = scope.plan().validate() {
                bail!("Invalid listing for scope '{}': {message}", scope.name);
            }
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/catalog-ingest/config.toml`
/// 2. `$HOME/.config/catalog-ingest/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(CONFIG_DIR_NAME).join("config.toml"));
    }
    let home = env_var_non_empty("HOME")?;
    Some(PathBuf::from(home).join(".config").join(CONFIG_DIR_NAME).join("config.toml"))
}

fn env_var_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Loads the explicit config file, or the default one if it exists.
pub fn load(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return load_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses and validates TOML config text.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Effective settings after merging every source.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub db_options: DatabaseOptions,
    pub pipeline: PipelineConfig,
    pub cache_enabled: bool,
    pub catalog: CatalogOptions,
    pub session: HttpSessionConfig,
    pub scopes: Vec<ScopeConfig>,
}

impl Settings {
    /// Merges command line, environment and file.
    pub fn resolve(args: &Args, sources: &ExplicitSources, file: Option<&FileConfig>) -> Result<Self> {
        let empty = FileConfig::default();
        let file = file.unwrap_or(&empty);

        let database = pick_path(sources.database, &args.database, file.database.as_ref());
        let checkpoint_dir = pick_path(sources.checkpoint_dir, &args.checkpoint_dir, file.checkpoint_dir.as_ref());
        let workers = pick(sources.workers, args.workers, file.workers);
        let queue_capacity = pick(sources.queue_capacity, args.queue_capacity, file.queue_capacity);
        let max_retries = pick(sources.max_retries, args.max_retries, file.max_retries);
        let max_restarts = pick(sources.max_restarts, args.max_restarts, file.max_restarts);
        let retry_delay_ms = pick(sources.retry_delay_ms, args.retry_delay_ms, file.retry_delay_ms);
        let cache_enabled = if sources.no_cache {
            !args.no_cache
        } else {
            file.cache.unwrap_or(!args.no_cache)
        };

        let retry = RetryPolicy::new(
            u32::from(max_retries),
            u32::from(max_restarts),
            Duration::from_millis(retry_delay_ms),
        );
        let pipeline = PipelineConfig::new(usize::from(workers), usize::from(queue_capacity), retry);

        Ok(Self {
            database,
            checkpoint_dir,
            db_options: DatabaseOptions {
                max_connections: file.db_max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
                busy_timeout_ms: file.db_busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            },
            pipeline,
            cache_enabled,
            catalog: CatalogOptions {
                series_refresh: file.series_refresh.unwrap_or_default(),
                episode_match: file.episode_match.unwrap_or_default(),
            },
            session: session_config(&file.session)?,
            scopes: select_scopes(&file.scopes, &args.scopes)?,
        })
    }

    /// Compiles each selected scope into a pipeline job.
    pub fn jobs(&self) -> Result<Vec<ScopeJob>> {
        self.scopes
            .iter()
            .map(|scope| {
                let extractor = PatternExtractor::new(&scope.extract)
                    .with_context(|| format!("Invalid extraction rules for scope '{}'", scope.name))?;
                Ok(ScopeJob::new(scope.name.clone(), scope.plan(), Arc::new(extractor)))
            })
            .collect()
    }
}

fn pick<T: Copy>(explicit: bool, arg: T, file: Option<T>) -> T {
    if explicit { arg } else { file.unwrap_or(arg) }
}

fn pick_path(explicit: bool, arg: &Path, file: Option<&PathBuf>) -> PathBuf {
    match file {
        Some(path) if !explicit => path.clone(),
        _ => arg.to_path_buf(),
    }
}

fn session_config(section: &SessionSection) -> Result<HttpSessionConfig> {
    let mut config = HttpSessionConfig::default();
    if let Some(user_agent) = &section.user_agent {
        config.user_agent.clone_from(user_agent);
    }
    if let Some(secs) = section.connect_timeout_secs {
        config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = section.read_timeout_secs {
        config.read_timeout = Duration::from_secs(secs);
    }
    if let Some(login) = &section.login {
        let username = env_var_non_empty(USERNAME_ENV).or_else(|| login.username.clone());
        let password = env_var_non_empty(PASSWORD_ENV).or_else(|| login.password.clone());
        let (Some(username), Some(password)) = (username, password) else {
            bail!(
                "Login is configured but credentials are missing: set `session.login.username`/`password` or {USERNAME_ENV}/{PASSWORD_ENV}"
            );
        };
        config.login = Some(LoginConfig {
            url: login.url.clone(),
            username_field: login.username_field.clone(),
            password_field: login.password_field.clone(),
            username,
            password,
        });
    }
    Ok(config)
}

fn select_scopes(configured: &[ScopeConfig], wanted: &[String]) -> Result<Vec<ScopeConfig>> {
    if configured.is_empty() {
        bail!("No scopes configured. Add at least one [[scopes]] table to the config file (see --config)");
    }
    if wanted.is_empty() {
        return Ok(configured.to_vec());
    }
    for name in wanted {
        if !configured.iter().any(|scope| &scope.name == name) {
            let known: Vec<&str> = configured.iter().map(|scope| scope.name.as_str()).collect();
            bail!("Unknown scope '{name}'. Configured scopes: {}", known.join(", "));
        }
    }
    Ok(configured
        .iter()
        .filter(|scope| wanted.contains(&scope.name))
        .cloned()
        .collect())
}
