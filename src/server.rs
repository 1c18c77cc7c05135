//! HTTP surface of the mock.
//!
//! | Method | Path        | Handler     |
//! |--------|-------------|-------------|
//! | POST   | `/_bulk`    | [`bulk`]    |
//! | GET    | `/`         | [`root`]    |
//! | GET    | `/_license` | [`license`] |
//! | other  | other       | [`fallback`] |

use crate::bulk::{BulkError, BulkProcessor};
use crate::config::{MockEsConfig, TlsSettings};
use crate::info::ClusterInfo;
use crate::metrics::{Counter, CounterSink};
use crate::odds::{ActionOdds, MethodOdds, MethodOutcome, OddsError};
use anyhow::Context;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use futures::TryStreamExt;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Body returned for every unrouted request.
pub const TAGLINE: &str = "{\"tagline\": \"You Know, for Testing\"}";

/// State shared by all handlers. Everything in it is read-only except the
/// counters, which are atomic.
#[derive(Clone)]
pub struct AppState {
    pub action_odds: Arc<ActionOdds>,
    pub method_odds: Arc<MethodOdds>,
    pub info: Arc<ClusterInfo>,
    pub counters: Arc<dyn CounterSink>,
    /// Applied before every request when set
    pub delay: Option<Duration>,
}

impl AppState {
    pub fn new(
        action_odds: ActionOdds,
        method_odds: MethodOdds,
        info: ClusterInfo,
        counters: Arc<dyn CounterSink>,
    ) -> Self {
        Self {
            action_odds: Arc::new(action_odds),
            method_odds: Arc::new(method_odds),
            info: Arc::new(info),
            counters,
            delay: None,
        }
    }

    /// Build state from configuration, with a fresh license uid expiring
    /// `license_expiry_hours` from now.
    pub fn from_config(
        config: &MockEsConfig,
        counters: Arc<dyn CounterSink>,
    ) -> Result<Self, OddsError> {
        let expires_at =
            chrono::Utc::now() + chrono::Duration::hours(i64::from(config.cluster.license_expiry_hours));
        let info = ClusterInfo::new(
            config.cluster.uuid.clone(),
            config.cluster.version.clone(),
            Uuid::new_v4(),
            expires_at,
        );

        Ok(Self::new(
            config.faults.action_odds()?,
            config.faults.method_odds()?,
            info,
            counters,
        )
        .with_delay(config.delay()))
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }
}

impl IntoResponse for BulkError {
    fn into_response(self) -> Response {
        let status = match &self {
            BulkError::Decode(_) => StatusCode::BAD_REQUEST,
            BulkError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self, status = status.as_u16(), "Bulk request aborted");
        status.into_response()
    }
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

/// POST /_bulk
///
/// The request-level outcome is drawn before the body is touched; a
/// too-large draw answers 413 straight away.
pub async fn bulk(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    state.counters.increment(Counter::BulkTotal);

    let method = state.method_odds.sample(&mut rand::thread_rng());
    if method == MethodOutcome::TooLarge {
        state.counters.increment(Counter::BulkTooLarge);
        debug!("Rejecting bulk request as too large");
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    let gzip = is_gzip(&headers);

    // The body is read on demand from the blocking task, so only the
    // current line is ever held in memory.
    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(stream));

    // Line processing is CPU bound; keep it off the async workers.
    let processed = tokio::task::spawn_blocking(move || {
        let processor = BulkProcessor::new(&state.action_odds, state.counters.as_ref());
        let outcome = processor.process_body(reader, gzip, &mut rand::thread_rng())?;
        let encoded = outcome.response.to_json()?;
        Ok::<_, BulkError>((outcome, encoded))
    })
    .await;

    match processed {
        Ok(Ok((outcome, encoded))) => {
            debug!(
                gzip,
                items = outcome.response.items.len(),
                errors = outcome.response.errors,
                index = outcome.summary.index,
                update = outcome.summary.update,
                delete = outcome.summary.delete,
                "Bulk request processed"
            );
            ([(CONTENT_TYPE, "application/json")], encoded).into_response()
        }
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!(error = %e, "Bulk processing task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /
pub async fn root(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    state.counters.increment(Counter::Root);
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    Json(state.info.root(user_agent))
}

/// GET /_license
pub async fn license(State(state): State<AppState>) -> Json<Value> {
    state.counters.increment(Counter::License);
    Json(state.info.license())
}

/// Anything else.
pub async fn fallback() -> &'static str {
    TAGLINE
}

async fn delay_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    next.run(request).await
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root).fallback(fallback))
        .route("/_bulk", post(bulk).fallback(fallback))
        .route("/_license", get(license).fallback(fallback))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), delay_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Load the PEM certificate chain and private key.
pub async fn load_tls(cert_file: &Path, key_file: &Path) -> anyhow::Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS certificate {} / key {}",
                cert_file.display(),
                key_file.display()
            )
        })
}

/// Serve until Ctrl-C, over HTTPS when `tls` names both files.
pub async fn run_server(addr: SocketAddr, tls: &TlsSettings, state: AppState) -> anyhow::Result<()> {
    let router = create_router(state);

    match tls.files() {
        Some((cert_file, key_file)) => {
            let rustls = load_tls(cert_file, key_file).await?;
            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(None);
                }
            });

            info!(address = %addr, cert = %cert_file.display(), "Mock Elasticsearch listening (TLS)");

            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .with_context(|| format!("TLS server error on {addr}"))?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;

            info!(address = %addr, "Mock Elasticsearch listening");

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
    }

    info!("Mock Elasticsearch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn state(registry: Arc<MetricsRegistry>) -> AppState {
        AppState::new(
            ActionOdds::always_ok(),
            MethodOdds::new(0).unwrap(),
            ClusterInfo::new("c", "8.17.0", Uuid::nil(), Utc::now()),
            registry,
        )
    }

    #[test]
    fn test_is_gzip() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert!(is_gzip(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("GZIP"));
        assert!(is_gzip(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("deflate"));
        assert!(!is_gzip(&headers));
    }

    #[test]
    fn test_from_config() {
        let mut config = MockEsConfig::default();
        config.faults.duplicate_percent = 40;
        config.delay_ms = 10;
        let state = AppState::from_config(&config, Arc::new(MetricsRegistry::new())).unwrap();
        assert_eq!(state.action_odds.table().count(crate::odds::ActionOutcome::Conflict), 40);
        assert_eq!(state.delay, Some(Duration::from_millis(10)));
        assert!(state.info.expires_at() > Utc::now());

        config.faults.too_large_percent = 101;
        assert!(AppState::from_config(&config, Arc::new(MetricsRegistry::new())).is_err());
    }

    #[tokio::test]
    async fn test_root_counts_hits() {
        let registry = Arc::new(MetricsRegistry::new());
        let state = state(registry.clone());
        let Json(doc) = root(State(state.clone()), HeaderMap::new()).await;
        assert_eq!(doc["version"]["number"], "8.17.0");
        let _ = license(State(state)).await;
        assert_eq!(registry.get(Counter::Root), 1);
        assert_eq!(registry.get(Counter::License), 1);
    }

    #[test]
    fn test_bulk_error_status() {
        let decode = BulkError::Decode(std::io::Error::other("bad gzip"));
        assert_eq!(decode.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_load_tls_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls(&dir.path().join("cert.pem"), &dir.path().join("key.pem"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cert.pem"));
    }

    #[tokio::test]
    async fn test_load_tls_rejects_garbage_pem() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();
        assert!(load_tls(&cert, &key).await.is_err());
    }

    #[tokio::test]
    async fn test_run_server_fails_on_bad_tls_before_serving() {
        let dir = tempfile::tempdir().unwrap();
        let tls = TlsSettings {
            cert_file: Some(dir.path().join("missing-cert.pem")),
            key_file: Some(dir.path().join("missing-key.pem")),
        };
        let registry = Arc::new(MetricsRegistry::new());
        let result = run_server("127.0.0.1:0".parse().unwrap(), &tls, state(registry)).await;
        assert!(result.is_err());
    }
}
