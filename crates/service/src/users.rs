//! Principal registration, activation, sign-in and removal.
//!
//! Registration writes the principal and its invitation in one transaction,
//! then sends the invitation. If sending fails the principal is deleted
//! again. That compensation runs after the commit: a crash in between leaves
//! an inactive principal whose invitation was never delivered. Such rows are
//! harmless (they cannot act) and can be removed with
//! [`UserService::delete_user`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, instrument};

use villabook_auth::{
    Invitation, InvitationToken, JwtClaims, NewPrincipal, PasswordHash, Principal, RoleName,
    ensure_can_assign, validate_claims,
};
use villabook_core::{UserId, ValidationRules};
use villabook_infra::{NotificationSender, UserStore, create_with_notification};

use crate::access::AccessControl;
use crate::error::{ServiceError, ServiceResult};

/// How invitations are issued and delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationSettings {
    /// Activation links are `{client_url}/confirm/{token}`.
    pub client_url: String,
    pub ttl: Duration,
    pub template: String,
    /// Ask the provider to validate without delivering.
    pub sandbox: bool,
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn NotificationSender>,
    access: AccessControl,
    rules: ValidationRules,
    invitations: InvitationSettings,
    token_ttl: Duration,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn NotificationSender>,
        access: AccessControl,
        rules: ValidationRules,
        invitations: InvitationSettings,
        token_ttl: Duration,
    ) -> Self {
        Self {
            users,
            mailer,
            access,
            rules,
            invitations,
            token_ttl,
        }
    }

    /// Self-registration with the default `user` role.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> ServiceResult<UserId> {
        let principal = self.new_principal(username, email, password, RoleName::USER).await?;
        self.invite(principal).await
    }

    /// Create a principal with a chosen role. Requires `admin`, and the
    /// role may not outrank the actor.
    pub async fn create_user(
        &self,
        actor: &Principal,
        username: &str,
        email: &str,
        password: &str,
        role: RoleName,
    ) -> ServiceResult<UserId> {
        self.access.require(actor, &RoleName::ADMIN).await?;

        let target = self
            .access
            .resolve(&role)
            .await?
            .ok_or_else(|| ServiceError::ReferenceNotFound(format!("role '{role}'")))?;
        ensure_can_assign(actor, &target)?;

        let principal = self.new_principal(username, email, password, role).await?;
        self.invite(principal).await
    }

    /// Invite the first `admin` without an acting principal.
    ///
    /// For the bootstrap binary only; request handlers must use
    /// [`UserService::create_user`].
    pub async fn bootstrap_admin(&self, username: &str, email: &str, password: &str) -> ServiceResult<UserId> {
        let principal = self.new_principal(username, email, password, RoleName::ADMIN).await?;
        self.invite(principal).await
    }

    /// Validate the submitted fields, then hash the password.
    async fn new_principal(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: RoleName,
    ) -> ServiceResult<NewPrincipal> {
        let (username, email) = (username.trim(), email.trim());
        self.rules.username(username)?;
        self.rules.email(email)?;
        self.rules.password(password)?;

        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || PasswordHash::create(&password))
            .await
            .map_err(|e| ServiceError::internal(format!("password hashing task failed: {e}")))??;
        Ok(NewPrincipal::new(username, email, role, hash))
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.id, role = %principal.role), err)]
    async fn invite(&self, principal: NewPrincipal) -> ServiceResult<UserId> {
        let (token, invitation) = Invitation::issue(principal.id, self.invitations.ttl, Utc::now())?;
        let vars = json!({
            "username": principal.username,
            "activationURL": self.activation_url(&token),
        });

        let mailer = self.mailer.clone();
        let settings = &self.invitations;
        let (name, address) = (principal.username.clone(), principal.email.clone());

        let id = create_with_notification(self.users.as_ref(), &principal, &[invitation], |_| async move {
            mailer
                .send(&settings.template, &name, &address, &vars, settings.sandbox)
                .await
                .map(|status| info!(status, "invitation sent"))
        })
        .await?;

        info!(user_id = %id, "principal invited");
        Ok(id)
    }

    fn activation_url(&self, token: &InvitationToken) -> String {
        format!("{}/confirm/{}", self.invitations.client_url, token.as_str())
    }

    /// Consume an invitation token. Unknown, expired or already used tokens
    /// are `NotFound`.
    #[instrument(skip(self, plain_token), err)]
    pub async fn activate(&self, plain_token: &str) -> ServiceResult<UserId> {
        let token = InvitationToken::parse(plain_token)?;
        let id = self
            .users
            .activate(&token.hash(), Utc::now())
            .await?
            .ok_or(ServiceError::NotFound)?;
        info!(user_id = %id, "principal activated");
        Ok(id)
    }

    /// Check an email and password and issue claims for the principal.
    ///
    /// Unknown emails and wrong passwords get the same `Unauthorized`
    /// answer. A principal that never activated cannot sign in.
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, email: &str, password: &str, now: DateTime<Utc>) -> ServiceResult<JwtClaims> {
        let rejected = || ServiceError::Unauthorized("invalid email or password".to_string());

        let credentials = self.users.credentials(email.trim()).await?.ok_or_else(rejected)?;

        let hash = credentials.password_hash;
        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || hash.verify(&password))
            .await
            .map_err(|e| ServiceError::internal(format!("password check task failed: {e}")))?;
        if !verified {
            return Err(rejected());
        }

        let principal = credentials.principal;
        if !principal.is_active {
            return Err(ServiceError::Unauthorized("account is not activated".to_string()));
        }

        info!(user_id = %principal.id, "principal signed in");
        Ok(JwtClaims {
            sub: principal.id,
            role: principal.role.name,
            issued_at: now,
            expires_at: now + self.token_ttl,
        })
    }

    /// Remove a principal and its invitation. Deleting a missing principal
    /// succeeds and returns false. Requires `admin`.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id, user_id = %id), err)]
    pub async fn delete_user(&self, actor: &Principal, id: UserId) -> ServiceResult<bool> {
        self.access.require(actor, &RoleName::ADMIN).await?;
        let removed = self.users.delete(id).await?;
        if removed {
            info!(user_id = %id, "principal deleted");
        }
        Ok(removed)
    }

    /// Resolve the acting principal from already verified token claims.
    ///
    /// Signature checks happen before this; here the time window, the
    /// principal's existence and its current role are checked.
    pub async fn authenticate(&self, claims: &JwtClaims, now: DateTime<Utc>) -> ServiceResult<Principal> {
        validate_claims(claims, now).map_err(villabook_auth::AuthzError::from)?;

        let principal = self
            .users
            .get(claims.sub)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("unknown principal".to_string()))?;

        if !principal.is_active {
            return Err(ServiceError::Unauthorized("account is not activated".to_string()));
        }
        if principal.role.name != claims.role {
            return Err(ServiceError::Unauthorized("role changed; sign in again".to_string()));
        }
        Ok(principal)
    }
}
