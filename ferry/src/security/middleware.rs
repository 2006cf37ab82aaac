use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::auth::{select_strategy, AuthStrategy, TokenProvider};
use super::license::LicenseService;
use super::types::{Principal, Role};
use crate::config::SecurityConfig;
use crate::error::{Error, Result};

/// Resolves the caller of each request according to the current license.
pub struct Authenticator {
    licenses: Arc<LicenseService>,
    tokens: Arc<TokenProvider>,
    default_principal: Principal,
    break_glass_paths: Vec<String>,
}

impl Authenticator {
    pub fn new(
        licenses: Arc<LicenseService>,
        tokens: Arc<TokenProvider>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            licenses,
            tokens,
            default_principal: Principal::new(config.default_login.clone(), &[Role::Admin]),
            break_glass_paths: config.break_glass_paths.clone(),
        }
    }

    pub fn default_principal(&self) -> &Principal {
        &self.default_principal
    }

    fn is_break_glass(&self, path: &str) -> bool {
        self.break_glass_paths.iter().any(|p| {
            path == p || path.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Authenticate one request. The strategy is re-selected on every call
    /// so license changes take effect immediately.
    pub fn authenticate(&self, path: &str, headers: &HeaderMap) -> Result<Principal> {
        let strategy = select_strategy(&self.licenses.current(), Utc::now());
        match strategy {
            AuthStrategy::NoLicense => {
                if self.is_break_glass(path) {
                    Ok(self.default_principal.clone())
                } else {
                    Err(Error::Forbidden(
                        "No active license on this instance".to_string(),
                    ))
                }
            }
            AuthStrategy::NoAuth => Ok(self.default_principal.clone()),
            AuthStrategy::Token => {
                let token = headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .ok_or_else(|| Error::Unauthorized("Missing bearer token".to_string()))?;
                self.tokens.validate(token)
            }
        }
    }
}

/// Axum middleware: authenticate, then store the [`Principal`] in request
/// extensions for handlers.
pub async fn auth_middleware(
    authenticator: Arc<Authenticator>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let principal = authenticator.authenticate(request.uri().path(), request.headers())?;
    debug!(login = %principal.login, path = %request.uri().path(), "Request authenticated");
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::license::{FeatureFlag, License};

    fn authenticator(license: License) -> (Authenticator, Arc<TokenProvider>) {
        let tokens = Arc::new(TokenProvider::new(&[9u8; 32], 3600));
        let auth = Authenticator::new(
            Arc::new(LicenseService::new(license)),
            tokens.clone(),
            &SecurityConfig::default(),
        );
        (auth, tokens)
    }

    #[test]
    fn test_no_license_allows_only_break_glass() {
        let (auth, _) = authenticator(License::none());
        let headers = HeaderMap::new();

        assert_eq!(auth.authenticate("/health", &headers).unwrap().login, "admin");
        assert!(auth.authenticate("/api/v2/settings/license", &headers).is_ok());
        assert!(matches!(
            auth.authenticate("/api/v2/projects", &headers),
            Err(Error::Forbidden(_))
        ));
        assert!(auth.authenticate("/healthz", &headers).is_err());
    }

    #[test]
    fn test_token_strategy_requires_bearer() {
        let mut license = License {
            active: true,
            ..License::none()
        };
        license.features.insert(FeatureFlag::Auth, true);
        let (auth, tokens) = authenticator(license);

        assert!(matches!(
            auth.authenticate("/api/v2/projects", &HeaderMap::new()),
            Err(Error::Unauthorized(_))
        ));

        let token = tokens
            .create_token(&Principal::new("alice", &[Role::AiCreator]))
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        assert_eq!(auth.authenticate("/api/v2/projects", &headers).unwrap().login, "alice");
    }

    #[test]
    fn test_license_change_applies_to_next_request() {
        let licenses = Arc::new(LicenseService::new(License::none()));
        let auth = Authenticator::new(
            licenses.clone(),
            Arc::new(TokenProvider::new(&[9u8; 32], 3600)),
            &SecurityConfig::default(),
        );
        assert!(auth.authenticate("/api/v2/projects", &HeaderMap::new()).is_err());

        licenses.replace(License {
            active: true,
            ..License::none()
        });
        assert!(auth.authenticate("/api/v2/projects", &HeaderMap::new()).unwrap().is_admin());
    }
}
