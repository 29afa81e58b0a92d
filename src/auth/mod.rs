//! Authentication: subjects, tokens, passwords, sessions.

pub mod jwt;
pub mod lockout;
pub mod password;
pub mod session;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated principal attached to every request.
///
/// Every repository call takes a `Subject` and scopes its queries to
/// `workspace_id`; a persisted row from another workspace is
/// indistinguishable from a missing one.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub role: Role,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "member" => Some(Role::Member),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
