use ferry_storage::Project;

use super::types::{Principal, Role};

/// Authorization predicate consulted before export and import.
pub trait PermissionEvaluator: Send + Sync {
    /// May the caller create (or import) projects?
    fn can_write(&self, principal: &Principal) -> bool;

    fn can_read_project(&self, principal: &Principal, project: &Project) -> bool;
}

/// Role-based policy: admins may do anything, AI creators may create
/// projects, owners and guests may read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePermissionEvaluator;

impl PermissionEvaluator for RolePermissionEvaluator {
    fn can_write(&self, principal: &Principal) -> bool {
        principal.is_admin() || principal.has_role(Role::AiCreator)
    }

    fn can_read_project(&self, principal: &Principal, project: &Project) -> bool {
        principal.is_admin()
            || project.owner == principal.login
            || project.guests.iter().any(|g| g == &principal.login)
    }
}
