use crate::collectors::FleetCollector;
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub fleet: Arc<FleetCollector>,
    pub metrics_path: Arc<str>,
}

pub fn build_router(metrics: Arc<Metrics>, fleet: Arc<FleetCollector>, metrics_path: &str) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route(metrics_path, get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .with_state(HttpAppState {
            metrics,
            fleet,
            metrics_path: Arc::from(metrics_path),
        })
}

async fn index(State(state): State<HttpAppState>) -> Html<String> {
    let version = env!("CARGO_PKG_VERSION");
    Html(format!(
        "<html>\n\
         <head><title>Carel sensor exporter (Version {version})</title></head>\n\
         <body>\n\
         <h1>Carel sensor exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.metrics_path
    ))
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    let (snapshot, stats) = state.fleet.scrape().await;
    state.metrics.record_scrape(&snapshot, &stats);
    match state.metrics.encode_snapshot(&snapshot) {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let (snapshot, stats) = state.fleet.scrape().await;
    state.metrics.record_scrape(&snapshot, &stats);
    Json(snapshot)
}
