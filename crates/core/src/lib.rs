//! `villabook-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod validation;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AmenityId, AmenityTypeId, BookingId, CategoryId, LocationId, RoleId, UserId, VillaId};
pub use validation::ValidationRules;
pub use value_object::ValueObject;
