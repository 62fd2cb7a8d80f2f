mod config;
mod error;
mod extractor;
mod handler;
mod proxy;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::Config, handler::Resolver};

/// Resolves a video page address into a direct media URL.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Resolve this address once, print the result and exit instead of serving.
    uri: Option<String>,
}

#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "media_resolver=info,tower_http=info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(message) => {
            eprintln!("Server error: {message}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32, String> {
    let config = Config::from_env().map_err(|error| error.to_string())?;
    let resolver = Arc::new(Resolver::from_config(&config));

    if let Some(uri) = cli.uri {
        let output = resolver.handle(&serde_json::json!({ "uri": uri })).await;
        let rendered = serde_json::to_string_pretty(&output)
            .map_err(|error| format!("Could not render result: {error}"))?;
        println!("{rendered}");
        return Ok(if output.status().is_success() { 0 } else { 1 });
    }

    let app = app(AppState { resolver });
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| format!("Could not bind {}: {error}", config.bind_addr))?;

    info!("Resolver listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| format!("HTTP server error: {error}"))?;
    Ok(0)
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/invoke", post(invoke))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn invoke(State(state): State<AppState>, Json(event): Json<Value>) -> Response {
    let output = state.resolver.handle(&event).await;
    (output.status(), Json(output)).into_response()
}
