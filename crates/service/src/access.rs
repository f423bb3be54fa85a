//! Role precedence checks against the role store.
//!
//! Required roles are resolved by name on every call. An unknown role name
//! fails closed.

use std::sync::Arc;

use tracing::debug;

use villabook_auth::{
    AccessGrant, BookingAction, Principal, Role, RoleName, authorize, authorize_booking_action,
};
use villabook_core::UserId;
use villabook_infra::RoleStore;

use crate::error::ServiceResult;

#[derive(Clone)]
pub struct AccessControl {
    roles: Arc<dyn RoleStore>,
}

impl AccessControl {
    pub fn new(roles: Arc<dyn RoleStore>) -> Self {
        Self { roles }
    }

    pub async fn resolve(&self, name: &RoleName) -> ServiceResult<Option<Role>> {
        Ok(self.roles.get_by_name(name).await?)
    }

    /// `actor` must be active and rank at least as high as `required`.
    pub async fn require(&self, actor: &Principal, required: &RoleName) -> ServiceResult<AccessGrant> {
        let resolved = self.resolve(required).await?;
        let grant = authorize(actor, required, resolved.as_ref()).inspect_err(|e| {
            debug!(user_id = %actor.id, required = %required, error = %e, "access denied");
        })?;
        Ok(grant)
    }

    /// Like [`AccessControl::require`], but the booking owner passes for
    /// actions other than delete.
    pub async fn require_for_booking(
        &self,
        actor: &Principal,
        owner: UserId,
        action: BookingAction,
        required: &RoleName,
    ) -> ServiceResult<AccessGrant> {
        let resolved = if action.owner_may_perform() && actor.id == owner {
            None
        } else {
            self.resolve(required).await?
        };

        let grant = authorize_booking_action(actor, owner, action, required, resolved.as_ref())
            .inspect_err(|e| {
                debug!(user_id = %actor.id, ?action, required = %required, error = %e, "access denied");
            })?;
        Ok(grant)
    }
}
