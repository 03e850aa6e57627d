use std::{fs, process, time::Duration};

use fetchwell::{
    cache::QueryParams,
    client::{ApiClient, ClientConfig},
    config::{self, Command, GetArgs, SendArgs, Settings, SignInArgs},
    error::ApiError,
    infra::{error::InfraError, telemetry},
    pipeline::ApiRequest,
};
use futures::future::join_all;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("{}", .0.user_message())]
    Api(#[from] ApiError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_cli_error(&error);
        process::exit(1);
    }
}

const SIGN_IN_HINT: &str = "session ended; run `fetchwell sign-in` to start a new one";

fn report_cli_error(error: &CliError) {
    let (status, hint) = match error {
        CliError::Api(err) => (
            err.status(),
            err.is_session_terminal().then_some(SIGN_IN_HINT),
        ),
        _ => (None, None),
    };
    if dispatcher::has_been_set() {
        error!(error = %error, status, hint, "command failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, status, hint, "command failed");
    });
}

async fn run() -> Result<(), CliError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let client = ApiClient::builder(ClientConfig::from(&settings)).build()?;
    let sweeper = client.spawn_sweeper();

    let result = match cli_args.command {
        Command::Get(args) => run_get(&client, &settings, args).await,
        Command::Send(args) => run_send(&client, args).await,
        Command::SignIn(args) => run_sign_in(&client, &settings, args).await,
        Command::SignOut => {
            client.sign_out();
            Ok(())
        }
    };

    sweeper.shutdown().await;
    result
}

async fn run_get(client: &ApiClient, settings: &Settings, args: GetArgs) -> Result<(), CliError> {
    let params: QueryParams = args.params.into_iter().collect();
    let ttl = match (args.ttl_seconds, args.metadata) {
        (Some(seconds), _) => Duration::from_secs(seconds),
        (None, true) => settings.cache.metadata_ttl,
        (None, false) => settings.cache.default_ttl,
    };

    let reads = (0..args.concurrency).map(|_| client.get_value(&args.endpoint, params.clone(), ttl));
    let mut results = join_all(reads).await.into_iter();
    info!(
        endpoint = %args.endpoint,
        callers = args.concurrency,
        cached = client.responses().cache().len(),
        "read complete"
    );

    match results.next() {
        Some(result) => print_json(&result?),
        None => Ok(()),
    }
}

async fn run_send(client: &ApiClient, args: SendArgs) -> Result<(), CliError> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|err| CliError::InvalidInput(format!("method `{}`: {err}", args.method)))?;

    let body = match (args.body, args.body_file) {
        (Some(inline), _) => Some(parse_body(&inline)?),
        (None, Some(path)) => {
            let raw = fs::read_to_string(&path).map_err(|err| InfraError::read_file(&path, err))?;
            Some(parse_body(&raw)?)
        }
        (None, None) => None,
    };

    let mut request = ApiRequest::new(method, args.path);
    if let Some(body) = body {
        request = request.with_body(body);
    }
    if args.long_running {
        request = request.long_running();
    }

    let value: Value = client.send(request).await?;
    print_json(&value)
}

async fn run_sign_in(
    client: &ApiClient,
    settings: &Settings,
    args: SignInArgs,
) -> Result<(), CliError> {
    let body = parse_body(&args.body)?;
    client.sign_in(&args.path, body).await?;

    match settings.auth.credentials_file.as_ref() {
        Some(path) => info!(path = %path.display(), "credentials stored"),
        None => info!("credentials kept in memory only; configure auth.credentials_file to keep them"),
    }
    Ok(())
}

fn parse_body(raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw).map_err(|err| CliError::InvalidInput(format!("body is not JSON: {err}")))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::InvalidInput(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
