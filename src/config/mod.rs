//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{ClientOverrides, CliArgs, Command, GetArgs, SendArgs, SignInArgs, parse_param};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fetchwell";
const ENV_PREFIX: &str = "FETCHWELL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LONG_RUNNING_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_METADATA_TTL_SECS: u64 = 1800;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
const DEFAULT_RENEWAL_PATH: &str = "/api/auth/refresh";
const DEFAULT_ANTI_FORGERY_PATH: &str = "/api/csrf-token";
const DEFAULT_SIGN_IN_REDIRECT: &str = "/en/login";
const DEFAULT_ENTRY_POINTS: [&str; 2] = ["/login", "/register"];
const DEFAULT_SIGN_IN_ENDPOINTS: [&str; 2] = ["/api/auth/login", "/api/auth/register"];

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    /// Sign-in and renewal calls go here.
    pub auth_base_url: Url,
    pub request_timeout: Duration,
    pub long_running_timeout: Duration,
}

impl ApiSettings {
    /// Settings pointing both services at `base_url` with default timeouts.
    pub fn new(base_url: Url) -> Self {
        Self {
            auth_base_url: base_url.clone(),
            base_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            long_running_timeout: Duration::from_secs(DEFAULT_LONG_RUNNING_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    /// Lifetime for slow-changing reference data.
    pub metadata_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub renewal_path: String,
    pub anti_forgery_path: String,
    pub sign_in_redirect: String,
    /// Locations from which a forced sign-out does not redirect.
    pub entry_points: Vec<String>,
    /// Paths classified as sign-in calls.
    pub sign_in_endpoints: Vec<String>,
    pub credentials_file: Option<PathBuf>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            renewal_path: DEFAULT_RENEWAL_PATH.to_string(),
            anti_forgery_path: DEFAULT_ANTI_FORGERY_PATH.to_string(),
            sign_in_redirect: DEFAULT_SIGN_IN_REDIRECT.to_string(),
            entry_points: DEFAULT_ENTRY_POINTS.map(str::to_string).to_vec(),
            sign_in_endpoints: DEFAULT_SIGN_IN_ENDPOINTS.map(str::to_string).to_vec(),
            credentials_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("auth.entry_points")
            .with_list_parse_key("auth.sign_in_endpoints"),
    );

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
    api: RawApiSettings,
    cache: RawCacheSettings,
    auth: RawAuthSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    auth_base_url: Option<String>,
    request_timeout_seconds: Option<u64>,
    long_running_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_seconds: Option<u64>,
    metadata_ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    renewal_path: Option<String>,
    anti_forgery_path: Option<String>,
    sign_in_redirect: Option<String>,
    entry_points: Option<Vec<String>>,
    sign_in_endpoints: Option<Vec<String>>,
    credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &ClientOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(url) = overrides.auth_base_url.as_ref() {
            self.api.auth_base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.request_timeout_seconds {
            self.api.request_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(path) = overrides.credentials_file.as_ref() {
            self.auth.credentials_file = Some(path.clone());
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
        let RawSettings {
            api,
            cache,
            auth,
            logging,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            cache: build_cache_settings(cache)?,
            auth: build_auth_settings(auth)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let base_url = parse_base_url(
        api.base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL),
        "api.base_url",
    )?;
    let auth_base_url = match api.auth_base_url.as_deref() {
        Some(raw) => parse_base_url(raw, "api.auth_base_url")?,
        None => base_url.clone(),
    };

    let request_timeout = seconds(
        api.request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        "api.request_timeout_seconds",
    )?;
    let long_running_timeout = seconds(
        api.long_running_timeout_seconds
            .unwrap_or(DEFAULT_LONG_RUNNING_TIMEOUT_SECS),
        "api.long_running_timeout_seconds",
    )?;
    if long_running_timeout < request_timeout {
        return Err(LoadError::invalid(
            "api.long_running_timeout_seconds",
            "must not be shorter than the request timeout",
        ));
    }

    Ok(ApiSettings {
        base_url,
        auth_base_url,
        request_timeout,
        long_running_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = seconds(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;
    let metadata_ttl = seconds(
        cache
            .metadata_ttl_seconds
            .unwrap_or(DEFAULT_METADATA_TTL_SECS),
        "cache.metadata_ttl_seconds",
    )?;
    let sweep_interval = seconds(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "cache.sweep_interval_seconds",
    )?;
    let max_entries = NonZeroUsize::new(cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES))
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

    Ok(CacheSettings {
        default_ttl,
        metadata_ttl,
        sweep_interval,
        max_entries,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let defaults = AuthSettings::default();

    let renewal_path = path_or(auth.renewal_path, defaults.renewal_path, "auth.renewal_path")?;
    let anti_forgery_path = path_or(
        auth.anti_forgery_path,
        defaults.anti_forgery_path,
        "auth.anti_forgery_path",
    )?;
    let sign_in_redirect = path_or(
        auth.sign_in_redirect,
        defaults.sign_in_redirect,
        "auth.sign_in_redirect",
    )?;

    let entry_points = non_blank(auth.entry_points).unwrap_or(defaults.entry_points);
    let sign_in_endpoints = non_blank(auth.sign_in_endpoints).unwrap_or(defaults.sign_in_endpoints);

    let credentials_file = auth
        .credentials_file
        .filter(|path| !path.as_os_str().is_empty());

    Ok(AuthSettings {
        renewal_path,
        anti_forgery_path,
        sign_in_redirect,
        entry_points,
        sign_in_endpoints,
        credentials_file,
    })
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

fn parse_base_url(raw: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{raw}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn path_or(value: Option<String>, default: String, key: &'static str) -> Result<String, LoadError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let trimmed = value.trim();
    if !trimmed.starts_with('/') {
        return Err(LoadError::invalid(key, "path must start with `/`"));
    }
    Ok(trimmed.to_string())
}

fn non_blank(values: Option<Vec<String>>) -> Option<Vec<String>> {
    let values: Vec<String> = values?
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    (!values.is_empty()).then_some(values)
}
