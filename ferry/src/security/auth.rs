//! Request authentication: strategy selection and JWT tokens.

use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::license::{FeatureFlag, License};
use super::types::Principal;
use crate::error::{Error, Result};

/// Which authenticator handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// No effective license: deny everything except break-glass paths
    NoLicense,
    /// Licensed with the AUTH feature: bearer token required
    Token,
    /// Licensed without AUTH: everyone is the default identity
    NoAuth,
}

/// Pick the authenticator for the current license state.
pub fn select_strategy(license: &License, now: DateTime<Utc>) -> AuthStrategy {
    if !license.is_effective(now) {
        AuthStrategy::NoLicense
    } else if license.has_feature(FeatureFlag::Auth) {
        AuthStrategy::Token
    } else {
        AuthStrategy::NoAuth
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Login
    pub sub: String,
    /// Comma-separated role names
    pub auth: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates HS256 bearer tokens.
pub struct TokenProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity_secs: i64,
}

impl TokenProvider {
    pub fn new(secret: &[u8], validity_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validity_secs: validity_secs as i64,
        }
    }

    /// Build from a base64-encoded secret.
    pub fn from_base64_secret(secret: &str, validity_secs: u64) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(secret.trim())
            .map_err(|e| Error::InvalidRequest(format!("JWT secret is not valid base64: {}", e)))?;
        if bytes.len() < 32 {
            return Err(Error::InvalidRequest(
                "JWT secret must be at least 256 bits".to_string(),
            ));
        }
        Ok(Self::new(&bytes, validity_secs))
    }

    /// Random base64 secret for instances without a configured one.
    pub fn generate_secret() -> String {
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    pub fn create_token(&self, principal: &Principal) -> Result<String> {
        self.create_token_at(principal, Utc::now())
    }

    pub fn create_token_at(&self, principal: &Principal, issued_at: DateTime<Utc>) -> Result<String> {
        let iat = issued_at.timestamp();
        let claims = Claims {
            sub: principal.login.clone(),
            auth: principal.roles.join(","),
            iat,
            exp: iat + self.validity_secs,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Token signing failed: {}", e)))
    }

    /// Validate signature and expiry, returning the caller.
    pub fn validate(&self, token: &str) -> Result<Principal> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| Error::Unauthorized(format!("Invalid token: {}", e)))?;
        let roles = data
            .claims
            .auth
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Principal {
            login: data.claims.sub,
            roles,
        })
    }
}
