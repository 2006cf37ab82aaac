use anyhow::{bail, Result};
use ferry::security::{Principal, Role, TokenProvider};
use std::path::Path;

use super::load_config;

/// Print a bearer token for `login` signed with `security.jwt_secret`
pub fn run_token(config_path: &Path, login: &str, roles: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let Some(ref secret) = config.security.jwt_secret else {
        bail!("security.jwt_secret is not set in {:?}", config_path);
    };
    let provider = TokenProvider::from_base64_secret(secret, config.security.token_validity_secs)?;

    let roles = roles
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| r.parse::<Role>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    let principal = Principal::new(login, &roles);

    println!("{}", provider.create_token(&principal)?);
    Ok(())
}
