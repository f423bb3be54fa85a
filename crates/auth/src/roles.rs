use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use villabook_core::{RoleId, ValueObject};

/// Role name used to look up a role row (e.g. "user", "admin").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    /// Default role for self-registered principals.
    pub const USER: RoleName = RoleName(Cow::Borrowed("user"));
    /// Operator role; gates catalog, villa and booking administration.
    pub const ADMIN: RoleName = RoleName(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric precedence of a role. Higher outranks lower; the order is total.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleLevel(i32);

impl RoleLevel {
    pub const fn new(level: i32) -> Self {
        Self(level)
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl ValueObject for RoleLevel {}

impl core::fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved role row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub level: RoleLevel,
    pub description: String,
}

impl Role {
    pub fn new(name: RoleName, level: RoleLevel, description: impl Into<String>) -> Self {
        Self {
            id: RoleId::new(),
            name,
            level,
            description: description.into(),
        }
    }

    /// Roles seeded by the bootstrap binary.
    pub fn defaults() -> Vec<Role> {
        vec![
            Role::new(RoleName::USER, RoleLevel::new(1), "Guest who books villas"),
            Role::new(RoleName::ADMIN, RoleLevel::new(5), "Operator managing villas and bookings"),
        ]
    }
}
