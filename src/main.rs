use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commitboard::config::PipelineConfig;
use commitboard::github::{GithubIdentityApi, IdentityApi};
use commitboard::pipeline::{Dispatcher, PipelineService, SubmitOutcome};
use commitboard::store::{Store, StoreError};
use commitboard::types::RepoUrl;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commitboard=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env();
    let store = Store::open(&config.db_path()).unwrap();
    let api: Arc<dyn IdentityApi> = Arc::new(GithubIdentityApi::new(&config).unwrap());

    let dispatcher = Dispatcher::start(config, store, api).await.unwrap();
    let service = dispatcher.service();

    let app = Router::new()
        .route("/repos", post(submit_repo))
        .route("/repos/state", get(repo_state))
        .route("/repos/leaderboard", get(leaderboard))
        .with_state(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Let the workers finish the jobs they have in flight.
    dispatcher.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    url: String,
    /// Re-drive a completed repository instead of returning the cached
    /// leaderboard.
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    url: String,
}

async fn submit_repo(
    State(service): State<PipelineService>,
    Json(body): Json<SubmitRequest>,
) -> Response {
    let url = match RepoUrl::parse(&body.url) {
        Ok(url) => url,
        Err(err) => return bad_request(err.to_string()),
    };
    let result = if body.refresh {
        service.submit_refresh(&url).await
    } else {
        service.submit(&url).await
    };
    match result {
        Ok(outcome) => {
            let status = match &outcome {
                SubmitOutcome::Fresh(_) => StatusCode::OK,
                _ => StatusCode::ACCEPTED,
            };
            let repo = outcome.repository();
            (
                status,
                Json(json!({
                    "outcome": outcome.label(),
                    "url": repo.url.as_str(),
                    "state": repo.state,
                })),
            )
                .into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn repo_state(
    State(service): State<PipelineService>,
    Query(query): Query<UrlQuery>,
) -> Response {
    let url = match RepoUrl::parse(&query.url) {
        Ok(url) => url,
        Err(err) => return bad_request(err.to_string()),
    };
    match service.get_status(&url).await {
        Ok(Some(status)) => (StatusCode::OK, Json(status)).into_response(),
        Ok(None) => not_found(),
        Err(err) => internal_error(err),
    }
}

async fn leaderboard(
    State(service): State<PipelineService>,
    Query(query): Query<UrlQuery>,
) -> Response {
    let url = match RepoUrl::parse(&query.url) {
        Ok(url) => url,
        Err(err) => return bad_request(err.to_string()),
    };
    match service.get_leaderboard(&url).await {
        Ok(Some(entries)) => (
            StatusCode::OK,
            Json(json!({ "url": url.as_str(), "entries": entries })),
        )
            .into_response(),
        Ok(None) => not_found(),
        Err(err) => internal_error(err),
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "repository not known" })),
    )
        .into_response()
}

fn internal_error(err: StoreError) -> Response {
    tracing::error!(error = %err, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}
