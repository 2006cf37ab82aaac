pub mod auth;
pub mod license;
pub mod middleware;
pub mod permissions;
pub mod types;

pub use auth::{select_strategy, AuthStrategy, Claims, TokenProvider};
pub use license::{FeatureFlag, License, LicenseService};
pub use middleware::{auth_middleware, Authenticator};
pub use permissions::{PermissionEvaluator, RolePermissionEvaluator};
pub use types::{Principal, Role};
