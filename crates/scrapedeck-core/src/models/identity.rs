//! Operator identity as returned by `/auth/me`, `/auth/login` and `/users`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Console role. The backend only issues these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Superadmin,
}

impl Role {
    /// Label shown next to the operator name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Superadmin => "Super Admin",
        }
    }

    /// The role a promote/demote action switches to.
    pub fn toggled(&self) -> Role {
        match self {
            Role::Admin => Role::Superadmin,
            Role::Superadmin => Role::Admin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved user profile tied to a valid credential. Held in memory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    pub role: Role,
}

impl Identity {
    /// Superadmins are the only operators offered user management.
    pub fn is_superadmin(&self) -> bool {
        self.role == Role::Superadmin
    }
}

/// Body of `PUT /users/{id}`. The password is only sent when changed.
#[derive(Debug, Clone, Serialize)]
pub struct UserUpdate {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}
