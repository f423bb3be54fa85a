//! Error taxonomy surfaced to callers.
//!
//! Every lower-layer error converts into [`ServiceError`]. Storage and
//! delivery failures become `Internal`, are logged where they are converted,
//! and carry only an opaque message.

use thiserror::Error;
use tracing::error;

use villabook_auth::{AuthzError, InvitationError, PasswordError};
use villabook_core::{BookingId, DomainError};
use villabook_infra::{ImageStoreError, SagaError, StoreError};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Overlapping stay, duplicate unique value or a concurrent status change.
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        /// The booking that blocks the requested stay, when known.
        conflicting: Option<BookingId>,
    },

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("not found")]
    NotFound,

    /// The side effect of a composite write failed. When `compensated` is
    /// false the committed root may still exist.
    #[error("notification failed (compensated: {compensated})")]
    NotificationFailed { compensated: bool },

    /// Storage or delivery failure.
    ///
    /// `retryable` is only ever true for a timed-out read.
    #[error("internal error: {message}")]
    Internal { message: String, retryable: bool },
}

impl ServiceError {
    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict {
            message: message.into(),
            conflicting: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Internal { retryable: true, .. })
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::InvalidTransition(msg) => ServiceError::InvalidTransition(msg),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthorized(msg) => ServiceError::Unauthorized(msg),
            AuthzError::Forbidden(role) => ServiceError::Forbidden(format!("requires role '{role}'")),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { constraint } => {
                ServiceError::conflict(format!("duplicate value ({constraint})"))
            }
            StoreError::ReferenceNotFound { constraint } => ServiceError::ReferenceNotFound(constraint),
            StoreError::InUse { constraint } => {
                ServiceError::conflict(format!("still referenced ({constraint})"))
            }
            StoreError::Overlap { conflicting } => ServiceError::Conflict {
                message: "villa is already booked for the requested dates".to_string(),
                conflicting,
            },
            StoreError::StaleStatus { current } => {
                ServiceError::conflict(format!("booking status changed concurrently to '{current}'"))
            }
            StoreError::NotFound => ServiceError::NotFound,
            StoreError::Timeout { operation, read_only } => {
                error!(operation, read_only, "store call timed out");
                ServiceError::Internal {
                    message: format!("{operation} timed out"),
                    retryable: read_only,
                }
            }
            other @ (StoreError::Contention | StoreError::Database(_)) => {
                error!(error = %other, "store failure");
                ServiceError::internal("storage failure")
            }
        }
    }
}

impl From<SagaError> for ServiceError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::DuplicateRoot(constraint) | SagaError::DuplicateDependent(constraint) => {
                ServiceError::conflict(format!("duplicate value ({constraint})"))
            }
            SagaError::ReferenceNotFound(constraint) | SagaError::DependentNotFound(constraint) => {
                ServiceError::ReferenceNotFound(constraint)
            }
            SagaError::NotificationFailed { compensated, reason } => {
                error!(compensated, %reason, "notification failed");
                ServiceError::NotificationFailed { compensated }
            }
            SagaError::Store(e) => e.into(),
        }
    }
}

impl From<InvitationError> for ServiceError {
    fn from(err: InvitationError) -> Self {
        match err {
            InvitationError::EmptyToken => ServiceError::Validation(err.to_string()),
            InvitationError::NonPositiveTtl => {
                error!(error = %err, "invitation settings are invalid");
                ServiceError::internal("invitation settings are invalid")
            }
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(err: PasswordError) -> Self {
        error!(error = %err, "password hashing failed");
        ServiceError::internal("password hashing failed")
    }
}

impl From<ImageStoreError> for ServiceError {
    fn from(err: ImageStoreError) -> Self {
        match err {
            ImageStoreError::InvalidKey(key) => ServiceError::Validation(format!("invalid image key '{key}'")),
            ImageStoreError::Io(msg) => {
                error!(error = %msg, "image store failure");
                ServiceError::internal("image storage failure")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use villabook_bookings::BookingStatus;

    #[test]
    fn only_read_timeouts_are_retryable() {
        let read: ServiceError = StoreError::Timeout { operation: "get_booking", read_only: true }.into();
        let write: ServiceError = StoreError::Timeout { operation: "insert_booking", read_only: false }.into();

        assert!(read.is_retryable());
        assert!(!write.is_retryable());
        assert!(!ServiceError::from(StoreError::Contention).is_retryable());
    }

    #[test]
    fn overlap_keeps_the_conflicting_booking() {
        let id = BookingId::new();
        let err: ServiceError = StoreError::Overlap { conflicting: Some(id) }.into();
        match err {
            ServiceError::Conflict { conflicting: Some(found), .. } if found == id => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stale_status_is_a_conflict() {
        let err: ServiceError = StoreError::StaleStatus { current: BookingStatus::CheckedIn }.into();
        match err {
            ServiceError::Conflict { message, conflicting: None } if message.contains("check_in") => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn saga_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            ServiceError::from(SagaError::DependentNotFound("villa_amenities_amenity_id_fkey".into())),
            ServiceError::ReferenceNotFound(_)
        ));
        assert!(matches!(
            ServiceError::from(SagaError::DuplicateRoot("villas_name_key".into())),
            ServiceError::Conflict { .. }
        ));
        assert_eq!(
            ServiceError::from(SagaError::NotificationFailed { compensated: false, reason: "down".into() }),
            ServiceError::NotificationFailed { compensated: false }
        );
    }

    #[test]
    fn forbidden_names_the_required_role() {
        let err: ServiceError = AuthzError::Forbidden("admin".into()).into();
        assert_eq!(err, ServiceError::Forbidden("requires role 'admin'".into()));
    }
}
