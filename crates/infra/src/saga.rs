//! Multi-step writes: a root row with dependents, optionally followed by an
//! external side effect.
//!
//! The root and its dependents are written in one transaction by the store,
//! so a failed dependent never leaves the root behind. A side effect cannot
//! join that transaction; if it fails, the committed root is deleted again
//! (compensation) and the caller learns whether that worked.

use std::future::Future;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{CompositeError, CompositeStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaError {
    /// The root violates a unique constraint (name, username, email...).
    #[error("duplicate root ({0})")]
    DuplicateRoot(String),

    /// The root references a row that does not exist.
    #[error("root references a missing row ({0})")]
    ReferenceNotFound(String),

    /// Two dependents collide, or a dependent already exists.
    #[error("duplicate dependent ({0})")]
    DuplicateDependent(String),

    /// A dependent references a row that does not exist.
    #[error("dependent references a missing row ({0})")]
    DependentNotFound(String),

    /// The side effect failed after the root was committed.
    ///
    /// `compensated` is false when deleting the root failed too; the root may
    /// then still exist.
    #[error("side effect failed (compensated: {compensated}): {reason}")]
    NotificationFailed { compensated: bool, reason: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<CompositeError> for SagaError {
    fn from(err: CompositeError) -> Self {
        match err {
            CompositeError::Root(StoreError::Duplicate { constraint }) => SagaError::DuplicateRoot(constraint),
            CompositeError::Root(StoreError::ReferenceNotFound { constraint }) => {
                SagaError::ReferenceNotFound(constraint)
            }
            CompositeError::Dependent(StoreError::Duplicate { constraint }) => {
                SagaError::DuplicateDependent(constraint)
            }
            CompositeError::Dependent(StoreError::ReferenceNotFound { constraint }) => {
                SagaError::DependentNotFound(constraint)
            }
            CompositeError::Root(other) | CompositeError::Dependent(other) => SagaError::Store(other),
        }
    }
}

/// Write `root` and all `dependents` atomically. Either everything is
/// committed or nothing is.
pub async fn create_with_dependents<R, D, S>(store: &S, root: &R, dependents: &[D]) -> Result<S::Id, SagaError>
where
    R: Sync,
    D: Sync,
    S: CompositeStore<R, D> + ?Sized,
{
    let id = store.insert_with_dependents(root, dependents).await?;
    info!(root_id = %id, dependents = dependents.len(), "composite write committed");
    Ok(id)
}

/// [`create_with_dependents`], then run `side_effect` with the new root id.
///
/// If the side effect fails the root is deleted. Deleting a root that is
/// already gone succeeds, so compensation may safely run more than once.
pub async fn create_with_notification<R, D, S, F, Fut, E>(
    store: &S,
    root: &R,
    dependents: &[D],
    side_effect: F,
) -> Result<S::Id, SagaError>
where
    R: Sync,
    D: Sync,
    S: CompositeStore<R, D> + ?Sized,
    F: FnOnce(S::Id) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: core::fmt::Display,
{
    let id = create_with_dependents(store, root, dependents).await?;

    let Err(err) = side_effect(id).await else {
        return Ok(id);
    };
    let reason = err.to_string();
    warn!(root_id = %id, %reason, "side effect failed; compensating");

    let compensated = match store.delete_root(id).await {
        Ok(()) => true,
        Err(compensation) => {
            error!(root_id = %id, error = %compensation, "compensation failed; root may remain");
            false
        }
    };

    Err(SagaError::NotificationFailed { compensated, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use villabook_auth::{Invitation, NewPrincipal, PasswordHash, RoleName};
    use villabook_core::UserId;

    use crate::schema::seed_roles;
    use crate::store::{InMemoryStore, UserStore};

    type Users = dyn CompositeStore<NewPrincipal, Invitation, Id = UserId>;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        seed_roles(&store).await.unwrap();
        store
    }

    fn stored_hash() -> PasswordHash {
        PasswordHash::from_phc("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA")
    }

    fn principal(name: &str) -> (NewPrincipal, Invitation) {
        let principal = NewPrincipal::new(name, format!("{name}@example.com"), RoleName::USER, stored_hash());
        let (_, invitation) = Invitation::issue(principal.id, Duration::hours(1), Utc::now()).unwrap();
        (principal, invitation)
    }

    #[tokio::test]
    async fn unknown_role_is_reported_and_nothing_is_written() {
        let store = seeded().await;
        let root = NewPrincipal::new("wayan", "wayan@example.com", RoleName::new("owner"), stored_hash());

        let users: &Users = &store;
        let err = create_with_dependents(users, &root, &[]).await.unwrap_err();
        assert!(matches!(err, SagaError::ReferenceNotFound(_)));
        assert!(UserStore::get(&store, root.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dependent_pointing_elsewhere_rolls_back_root() {
        let store = seeded().await;
        let (root, _) = principal("ketut");
        let (_, foreign) = principal("putu");

        let users: &Users = &store;
        let err = create_with_dependents(users, &root, &[foreign]).await.unwrap_err();
        assert!(matches!(err, SagaError::DependentNotFound(_)));
        assert!(UserStore::get(&store, root.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_side_effect_compensates() {
        let store = seeded().await;
        let (root, invitation) = principal("gede");

        let users: &Users = &store;
        let err = create_with_notification(users, &root, &[invitation], |_| async {
            Err::<(), _>("mail provider unavailable")
        })
        .await
        .unwrap_err();

        match err {
            SagaError::NotificationFailed { compensated: true, reason } if reason.contains("unavailable") => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(UserStore::get(&store, root.id).await.unwrap().is_none());

        // A second compensation of the same root is harmless.
        users.delete_root(root.id).await.unwrap();
    }

    #[tokio::test]
    async fn successful_side_effect_sees_the_committed_root() {
        let store = seeded().await;
        let (root, invitation) = principal("agung");

        let users: &Users = &store;
        let id = create_with_notification(users, &root, &[invitation], |id| {
            let store = &store;
            async move {
                let found = UserStore::get(store, id).await.map_err(|e| e.to_string())?;
                found.map(|_| ()).ok_or_else(|| "root not visible".to_string())
            }
        })
        .await
        .unwrap();

        assert_eq!(id, root.id);
    }
}
