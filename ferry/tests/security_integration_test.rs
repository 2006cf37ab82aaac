//! License-driven authentication at the router level.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use ferry::api::ApiServer;
use ferry::config::{SecurityConfig, ServerConfig};
use ferry::security::{
    Authenticator, FeatureFlag, License, LicenseService, Principal, Role,
    RolePermissionEvaluator, TokenProvider,
};
use ferry::staging::StagingManager;
use ferry::transfer::TransferService;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct App {
    _temp: TempDir,
    router: Router,
    licenses: Arc<LicenseService>,
    tokens: Arc<TokenProvider>,
}

async fn app(security: SecurityConfig) -> App {
    let temp = TempDir::new().unwrap();
    let store = store_with_users(&["admin"]).await;
    let staging = StagingManager::new(temp.path().join("staging"), 4).unwrap();
    let transfer = Arc::new(TransferService::new(
        store,
        staging,
        Arc::new(RolePermissionEvaluator),
        UNPACK_LIMITS,
    ));
    let licenses = Arc::new(LicenseService::new(License::none()));
    let tokens = Arc::new(TokenProvider::new(&[3u8; 32], 600));
    let authenticator = Arc::new(Authenticator::new(licenses.clone(), tokens.clone(), &security));
    let router = ApiServer::new(transfer, licenses.clone(), authenticator, ServerConfig::default()).router();

    App {
        _temp: temp,
        router,
        licenses,
        tokens,
    }
}

async fn get(router: &Router, uri: &str, bearer: Option<&str>) -> StatusCode {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_license_changes_take_effect_per_request() {
    let app = app(SecurityConfig::default()).await;

    assert_eq!(get(&app.router, "/api/v2/projects", None).await, StatusCode::FORBIDDEN);
    assert_eq!(get(&app.router, "/health", None).await, StatusCode::OK);

    app.licenses.replace(License {
        active: true,
        ..License::none()
    });
    assert_eq!(get(&app.router, "/api/v2/projects", None).await, StatusCode::OK);

    let mut with_auth = License {
        active: true,
        ..License::none()
    };
    with_auth.features.insert(FeatureFlag::Auth, true);
    app.licenses.replace(with_auth);
    assert_eq!(get(&app.router, "/api/v2/projects", None).await, StatusCode::UNAUTHORIZED);

    let token = app
        .tokens
        .create_token(&Principal::new("admin", &[Role::Admin]))
        .unwrap();
    assert_eq!(get(&app.router, "/api/v2/projects", Some(&token)).await, StatusCode::OK);
}

#[tokio::test]
async fn test_expired_license_denies_requests() {
    let app = app(SecurityConfig::default()).await;
    app.licenses.replace(License {
        active: true,
        expires_on: Some(chrono::Utc::now() - chrono::Duration::minutes(5)),
        ..License::none()
    });

    assert_eq!(get(&app.router, "/api/v2/projects", None).await, StatusCode::FORBIDDEN);
    assert_eq!(
        get(&app.router, "/api/v2/settings/license", None).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_custom_break_glass_paths() {
    let app = app(SecurityConfig {
        break_glass_paths: vec!["/api/v2/projects".to_string()],
        ..SecurityConfig::default()
    })
    .await;

    assert_eq!(get(&app.router, "/api/v2/projects", None).await, StatusCode::OK);
    assert_eq!(get(&app.router, "/health", None).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_metrics_route_bypasses_license_check() {
    let app = app(SecurityConfig::default()).await;
    // No recorder installed: the route exists but has nothing to render.
    assert_eq!(get(&app.router, "/metrics", None).await, StatusCode::NOT_FOUND);
}
