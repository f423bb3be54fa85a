//! Application services.
//!
//! Each call resolves access first, then runs the domain logic, then talks to
//! the gateway. Callers pass the acting principal explicitly; nothing is read
//! from ambient request state.

pub mod access;
pub mod bookings;
pub mod catalog;
pub mod error;
pub mod registry;
pub mod users;
pub mod villas;

pub use access::AccessControl;
pub use bookings::BookingService;
pub use catalog::CatalogService;
pub use error::{ServiceError, ServiceResult};
pub use registry::{Backends, ServiceSettings, Services};
pub use users::{InvitationSettings, UserService};
pub use villas::VillaService;
