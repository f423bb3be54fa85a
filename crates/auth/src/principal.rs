use serde::{Deserialize, Serialize};

use villabook_core::{Entity, UserId};

use crate::{PasswordHash, Role, RoleName};

/// A resolved principal for authorization decisions.
///
/// Handlers load this once per request and pass it explicitly into the
/// services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Inactive until the invitation token is consumed.
    pub is_active: bool,
}

impl Entity for Principal {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Root row of the registration saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrincipal {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: RoleName,
    pub password_hash: PasswordHash,
}

impl NewPrincipal {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        role: RoleName,
        password_hash: PasswordHash,
    ) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            role,
            password_hash,
        }
    }
}

/// A principal with its stored password hash. Only sign-in reads this.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub principal: Principal,
    pub password_hash: PasswordHash,
}
