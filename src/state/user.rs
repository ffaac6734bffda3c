use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role granted to a caller by the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// May create rounds.
    Admin,
    /// Regular participant.
    Player,
    /// Taps are counted but never scored.
    ZeroScore,
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "player" | "survivor" | "user" => Ok(UserRole::Player),
            "zero_score" | "nikita" => Ok(UserRole::ZeroScore),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// Identity attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Stable user identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role granted by the gateway.
    pub role: UserRole,
}

impl AuthenticatedUser {
    /// Convenience constructor used by tests and the identity extractor.
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    /// Whether this user may create rounds.
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether this user's taps are pinned to zero points.
    pub fn is_zero_score(&self) -> bool {
        self.role == UserRole::ZeroScore
    }
}
