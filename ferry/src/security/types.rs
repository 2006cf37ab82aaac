use serde::{Deserialize, Serialize};

/// Authority names carried in tokens and user records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    AiCreator,
    AiTester,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ROLE_ADMIN",
            Role::AiCreator => "ROLE_AI_CREATOR",
            Role::AiTester => "ROLE_AI_TESTER",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROLE_ADMIN" => Ok(Role::Admin),
            "ROLE_AI_CREATOR" => Ok(Role::AiCreator),
            "ROLE_AI_TESTER" => Ok(Role::AiTester),
            _ => Err(format!("Unknown role '{}'", s)),
        }
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub login: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(login: impl Into<String>, roles: &[Role]) -> Self {
        Self {
            login: login.into(),
            roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r == role.as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}
