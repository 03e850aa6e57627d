use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use serde_json::Value;

/// Command-line arguments for the fetchwell binary.
#[derive(Debug, Parser)]
#[command(name = "fetchwell", version, about = "Cached, session-aware API client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "FETCHWELL_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ClientOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Read an endpoint through the response cache.
    Get(GetArgs),
    /// Send an arbitrary request through the authenticated pipeline.
    Send(SendArgs),
    /// Sign in and store the returned credentials.
    #[command(name = "sign-in")]
    SignIn(SignInArgs),
    /// Forget stored credentials.
    #[command(name = "sign-out")]
    SignOut,
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    /// Endpoint path, e.g. /api/cars/makes.
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// Query parameter; values that parse as JSON are sent as such.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Cache lifetime for this read.
    #[arg(long = "ttl-seconds", value_name = "SECONDS", conflicts_with = "metadata")]
    pub ttl_seconds: Option<u64>,

    /// Use the reference-data cache lifetime.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub metadata: bool,

    /// Number of identical concurrent reads to issue.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,
}

#[derive(Debug, Args, Clone)]
pub struct SendArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE).
    #[arg(value_name = "METHOD")]
    pub method: String,

    #[arg(value_name = "PATH")]
    pub path: String,

    /// JSON request body.
    #[arg(long, value_name = "JSON")]
    pub body: Option<String>,

    /// Read the JSON request body from a file.
    #[arg(long = "body-file", value_name = "FILE", value_hint = ValueHint::FilePath, conflicts_with = "body")]
    pub body_file: Option<PathBuf>,

    /// Apply the long-running timeout.
    #[arg(long = "long-running", action = clap::ArgAction::SetTrue)]
    pub long_running: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SignInArgs {
    /// Sign-in or sign-up endpoint.
    #[arg(value_name = "PATH", default_value = "/api/auth/login")]
    pub path: String,

    /// JSON body with the sign-in fields.
    #[arg(long, value_name = "JSON")]
    pub body: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ClientOverrides {
    /// Override the data API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the authentication service base URL.
    #[arg(long = "auth-base-url", value_name = "URL", global = true)]
    pub auth_base_url: Option<String>,

    /// Override the default request timeout.
    #[arg(long = "request-timeout-seconds", value_name = "SECONDS", global = true)]
    pub request_timeout_seconds: Option<u64>,

    /// Override the default cache lifetime.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override where credentials are persisted.
    #[arg(long = "credentials-file", value_name = "PATH", value_hint = ValueHint::FilePath, global = true)]
    pub credentials_file: Option<PathBuf>,

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

/// Parse a `NAME=VALUE` query parameter.
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name is empty in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
