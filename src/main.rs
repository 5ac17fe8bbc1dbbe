//! resilient-fetch
//!
//! Sends one request through the resilient pipeline and prints the result.
//!
//! ```text
//! resilient-fetch [--config FILE] [-X METHOD] [-d DATA] [-H 'K: V']... [--json] [-v] URL
//! ```
//!
//! Ctrl+C cancels the call, including any pending backoff.

use std::path::PathBuf;
use std::process::ExitCode;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, Response};
use clap::Parser;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use resilient_http::config::{load_config, ClientConfig};
use resilient_http::observability::{logging, metrics};
use resilient_http::resilience::Attempts;
use resilient_http::{Error, HttpClient};

#[derive(Parser)]
#[command(name = "resilient-fetch")]
#[command(about = "Send an HTTP request with retries and circuit breaking", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Extra header, as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Print a JSON summary instead of the raw body
    #[arg(long)]
    json: bool,

    /// Print the response status line and headers
    #[arg(short, long)]
    verbose: bool,

    url: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    logging::init(&config.observability.log_level)?;

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let client = HttpClient::from_config(&config)?;
    let request = build_request(&cli)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling request");
            on_signal.cancel();
        }
    });

    let mut request = request;
    request.extensions_mut().insert(cancel);

    match client.send(request).await {
        Ok(response) => {
            print_response(response, cli.json, cli.verbose).await?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_error(err, cli.json).await?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_request(cli: &Cli) -> Result<Request<Body>, Box<dyn std::error::Error>> {
    let method = Method::from_bytes(cli.method.to_uppercase().as_bytes())?;
    let mut builder = Request::builder().method(method).uri(cli.url.as_str());

    for raw in &cli.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("header '{raw}' is not in 'Name: value' form"))?;
        builder = builder.header(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }

    let body = cli.data.clone().map(Body::from).unwrap_or_else(Body::empty);
    Ok(builder.body(body)?)
}

async fn print_response(
    response: Response<Body>,
    json: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await?;
    let attempts = parts.extensions.get::<Attempts>().map_or(1, Attempts::len);

    if json {
        let mut headers = Map::new();
        for (name, value) in &parts.headers {
            headers.insert(
                name.to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            );
        }
        let summary = json!({
            "status": parts.status.as_u16(),
            "attempts": attempts,
            "headers": headers,
            "body": String::from_utf8_lossy(&bytes),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if verbose {
        println!("{:?} {}", parts.version, parts.status);
        for (name, value) in &parts.headers {
            println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
        println!();
    }
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

async fn print_error(err: Error, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let body = match &err {
        Error::UnexpectedStatus(failed) => {
            Some(axum::body::to_bytes(failed.take_body(), usize::MAX).await?)
        }
        _ => None,
    };

    if json {
        let mut summary = json!({
            "error": err.to_string(),
            "kind": format!("{:?}", err.kind()),
        });
        if let Error::UnexpectedStatus(failed) = &err {
            summary["status"] = json!(failed.status.as_u16());
            summary["attempts"] = json!(failed.attempts);
        }
        if let Some(body) = &body {
            summary["body"] = json!(String::from_utf8_lossy(body));
        }
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    eprintln!("Error: {err}");
    if let Some(body) = body.filter(|b| !b.is_empty()) {
        eprintln!("Response: {}", String::from_utf8_lossy(&body));
    }
    Ok(())
}
