use serde::Serialize;
use thiserror::Error;

use villabook_core::UserId;

use crate::{Principal, Role, RoleName};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Missing, invalid or inactive credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but the role does not carry enough precedence.
    #[error("forbidden: requires role '{0}'")]
    Forbidden(String),
}

/// Why an action was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessGrant {
    /// The acting principal owns the booking.
    Owner,
    /// The acting principal's role level meets the required level.
    Precedence,
}

/// Actions bound to a specific booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Read,
    CheckIn,
    CheckOut,
    Delete,
}

impl BookingAction {
    /// Owners may read and move their booking through its lifecycle, but
    /// deletion always goes through the precedence check.
    pub fn owner_may_perform(self) -> bool {
        !matches!(self, BookingAction::Delete)
    }
}

/// `principal.role.level >= required.level`.
pub fn has_precedence(principal: &Principal, required: &Role) -> bool {
    principal.role.level >= required.level
}

/// Precedence check against a role the caller resolved by name.
///
/// `resolved` is `None` when the role store had no row for `required`; that
/// fails closed.
///
/// - No IO
/// - No panics
pub fn authorize(
    principal: &Principal,
    required: &RoleName,
    resolved: Option<&Role>,
) -> Result<AccessGrant, AuthzError> {
    ensure_active(principal)?;

    match resolved {
        Some(role) if role.name == *required && has_precedence(principal, role) => {
            Ok(AccessGrant::Precedence)
        }
        _ => Err(AuthzError::Forbidden(required.to_string())),
    }
}

/// Booking-bound authorization with the ownership override.
pub fn authorize_booking_action(
    principal: &Principal,
    owner: UserId,
    action: BookingAction,
    required: &RoleName,
    resolved: Option<&Role>,
) -> Result<AccessGrant, AuthzError> {
    ensure_active(principal)?;

    if action.owner_may_perform() && principal.id == owner {
        return Ok(AccessGrant::Owner);
    }

    authorize(principal, required, resolved)
}

/// An actor may only hand out roles at or below its own level.
pub fn ensure_can_assign(actor: &Principal, target: &Role) -> Result<(), AuthzError> {
    if has_precedence(actor, target) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(target.name.to_string()))
    }
}

fn ensure_active(principal: &Principal) -> Result<(), AuthzError> {
    if principal.is_active {
        Ok(())
    } else {
        Err(AuthzError::Unauthorized("account is not activated".to_string()))
    }
}
