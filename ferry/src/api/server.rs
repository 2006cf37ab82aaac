use crate::config::{CorsConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::security::{auth_middleware, Authenticator, LicenseService};
use crate::transfer::TransferService;
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method},
    middleware::{self, Next},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::routes;

#[derive(Clone)]
pub struct AppState {
    pub transfer: Arc<TransferService>,
    pub licenses: Arc<LicenseService>,
    pub metrics: Option<PrometheusHandle>,
}

pub struct ApiServer {
    state: AppState,
    authenticator: Arc<Authenticator>,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(
        transfer: Arc<TransferService>,
        licenses: Arc<LicenseService>,
        authenticator: Arc<Authenticator>,
        config: ServerConfig,
    ) -> Self {
        Self {
            state: AppState {
                transfer,
                licenses,
                metrics: None,
            },
            authenticator,
            config,
        }
    }

    /// Serve Prometheus metrics at GET /metrics
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build CORS layer from configuration
    fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
        if !cors_config.enabled {
            return CorsLayer::new();
        }

        let origins: Vec<HeaderValue> = cors_config
            .origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| o.parse().ok())
            .collect();

        let has_wildcard = cors_config.origins.iter().any(|o| o == "*");

        let cors = if has_wildcard {
            CorsLayer::new().allow_origin(tower_http::cors::Any)
        } else if origins.is_empty() {
            CorsLayer::new()
        } else {
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(tower_http::cors::Any)
    }

    pub fn router(&self) -> Router {
        let authenticator = self.authenticator.clone();

        let api_routes = Router::new()
            .route("/health", get(routes::health))
            .route("/api/v2/settings/license", get(routes::get_license))
            .route("/api/v2/projects", get(routes::list_projects))
            .route("/api/v2/project/:id/export", get(routes::export_project))
            .route(
                "/api/v2/project/import/prepare",
                post(routes::prepare_import),
            )
            .route(
                "/api/v2/project/import/:token",
                post(routes::commit_import).delete(routes::abandon_import),
            )
            .layer(middleware::from_fn(move |request: Request, next: Next| {
                auth_middleware(authenticator.clone(), request, next)
            }))
            .with_state(self.state.clone());

        // Scraped by infrastructure, outside license-gated authentication
        let metrics_routes = Router::new()
            .route("/metrics", get(routes::metrics))
            .with_state(self.state.clone());

        Router::new()
            .merge(api_routes)
            .merge(metrics_routes)
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .layer(Self::build_cors_layer(&self.config.cors))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Cannot bind {}: {}", addr, e)))?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}
