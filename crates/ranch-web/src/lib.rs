//! Axum trigger surface for the sync pipelines.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ranch_sync::{SyncConfig, SyncError, SyncService};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "ranch-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
}

impl AppState {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/sync/forms", post(sync_forms_handler))
        .route("/sync/memberships", post(sync_memberships_handler))
        .route("/sync/registrants", post(sync_registrants_handler))
        .with_state(state)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("RANCH_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = SyncConfig::from_env()?;
    let pool = ranch_sync::connect_pool(&config.database_url).await?;
    let service = Arc::new(SyncService::from_config(config, pool)?);

    let mut scheduler = ranch_sync::maybe_build_scheduler(Arc::clone(&service)).await?;
    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.start().await?;
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(AppState::new(service))).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
}

async fn sync_forms_handler(State(state): State<AppState>) -> Response {
    match state.service.sync_forms().await {
        Ok(report) => ok_json(report),
        Err(err) => error_json(err),
    }
}

async fn sync_memberships_handler(State(state): State<AppState>) -> Response {
    match state.service.sync_memberships().await {
        Ok(report) => ok_json(report),
        Err(err) => error_json(err),
    }
}

async fn sync_registrants_handler(State(state): State<AppState>) -> Response {
    match state.service.sync_registrants().await {
        Ok(report) => ok_json(report),
        Err(err) => error_json(err),
    }
}

fn ok_json<T: Serialize>(report: T) -> Response {
    #[derive(Serialize)]
    struct Body<T: Serialize> {
        ok: bool,
        #[serde(flatten)]
        report: T,
    }
    (StatusCode::OK, Json(Body { ok: true, report })).into_response()
}

/// Fatal failures surface the underlying message verbatim; drops never
/// reach this path.
fn error_json(err: SyncError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"ok": false, "error": err.to_string()})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use ranch_resolve::HttpProbe;
    use ranch_sync::MemoryStore;
    use ranch_upstream::UpstreamClient;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_state(upstream_uri: &str) -> AppState {
        let config = SyncConfig {
            database_url: "postgres://unused".to_string(),
            api_key: "test-key".to_string(),
            upstream_base_url: upstream_uri.to_string(),
            primary_host: "https://p.test".to_string(),
            secondary_host: "https://s.test".to_string(),
            user_agent: "ranch-web-test/0.1".to_string(),
            map_concurrency: 4,
            page_timeout_secs: 5,
            detail_timeout_secs: 5,
            probe_timeout_secs: 1,
            scheduler_enabled: false,
            sync_cron_1: "0 0 6 * * *".to_string(),
            sync_cron_2: "0 0 18 * * *".to_string(),
        };
        let api = UpstreamClient::new(config.upstream()).expect("client builds");
        let probe = HttpProbe::with_timeout(&config.user_agent, Duration::from_secs(1))
            .expect("probe builds");
        let service =
            SyncService::with_parts(config, api, Arc::new(MemoryStore::new()), Arc::new(probe));
        AppState::new(Arc::new(service))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body readable")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = app(test_state("http://127.0.0.1:9"));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn sync_forms_returns_report_with_ok_true() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [],
                "isMore": false,
            })))
            .mount(&upstream)
            .await;

        let app = app(test_state(&upstream.uri()));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync/forms")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["total"], 0);
        assert_eq!(body["synced"], 0);
    }

    #[tokio::test]
    async fn fatal_upstream_failure_maps_to_500_with_the_message() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/memberships"))
            .respond_with(ResponseTemplate::new(503).set_body_string("registry down"))
            .mount(&upstream)
            .await;

        let app = app(test_state(&upstream.uri()));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync/memberships")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        let message = body["error"].as_str().expect("error string");
        assert!(message.contains("503"));
        assert!(message.contains("registry down"));
    }
}
