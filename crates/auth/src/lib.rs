//! `villabook-auth`: the pure authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: role rows are
//! resolved by the caller and handed in, never looked up here.

pub mod authorize;
pub mod claims;
pub mod invitation;
pub mod password;
pub mod principal;
pub mod roles;

pub use authorize::{
    AccessGrant, AuthzError, BookingAction, authorize, authorize_booking_action, ensure_can_assign,
    has_precedence,
};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use invitation::{Invitation, InvitationError, InvitationToken, TokenHash};
pub use password::{PasswordError, PasswordHash};
pub use principal::{Credentials, NewPrincipal, Principal};
pub use roles::{Role, RoleLevel, RoleName};
