//! Persistence gateway.
//!
//! Stores are split by concern and share one error type. Every implementation
//! must uphold the same constraints, whether the backing store enforces them
//! (Postgres) or the implementation emulates them (in-memory):
//!
//! - unique names for catalog rows, villas, usernames and emails
//! - referenced category, location, amenity type, amenity and role rows exist
//! - one link per (villa, amenity) pair
//! - no two bookings of one villa with intersecting stays
//! - status updates apply only when the stored status matches the expected one

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use villabook_auth::{
    Credentials, Invitation, NewPrincipal, Principal, Role, RoleName, TokenHash,
};
use villabook_bookings::{Booking, BookingStatus, StayRange};
use villabook_core::{
    AmenityId, AmenityTypeId, BookingId, CategoryId, LocationId, UserId, VillaId,
};
use villabook_villas::{Amenity, AmenityType, Category, Location, Villa, VillaDetails};

/// Persistence gateway error.
///
/// See [`crate::db`] for the mapping from Postgres SQLSTATE codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("duplicate value violates '{constraint}'")]
    Duplicate { constraint: String },

    /// A foreign key pointed at a row that does not exist.
    #[error("referenced row does not exist ('{constraint}')")]
    ReferenceNotFound { constraint: String },

    /// The row is still referenced and cannot be deleted.
    #[error("row is still referenced ('{constraint}')")]
    InUse { constraint: String },

    /// The stay intersects an existing booking of the same villa.
    #[error("stay overlaps an existing booking")]
    Overlap { conflicting: Option<BookingId> },

    /// Conditional status update found a different status.
    #[error("booking status is '{current}'")]
    StaleStatus { current: BookingStatus },

    #[error("row not found")]
    NotFound,

    /// Serialization failure or deadlock; the transaction was rolled back.
    #[error("transaction aborted by concurrent access")]
    Contention,

    #[error("{operation} timed out")]
    Timeout {
        operation: &'static str,
        read_only: bool,
    },

    #[error("database error: {0}")]
    Database(String),
}

/// Offset pagination.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp `limit` into `1..=MAX_LIMIT`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

/// Villa listing filters. Unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillaQuery {
    pub page: Page,
    /// Newest first when true.
    pub descending: bool,
    pub category_id: Option<CategoryId>,
    pub location_id: Option<LocationId>,
    /// Villas that can host at least this many guests.
    pub min_guests: Option<i32>,
    /// Villas with at least this many bedrooms.
    pub min_bedrooms: Option<i32>,
}

impl VillaQuery {
    pub fn matches(&self, villa: &Villa) -> bool {
        self.category_id.is_none_or(|c| villa.category_id == c)
            && self.location_id.is_none_or(|l| villa.location_id == l)
            && self.min_guests.is_none_or(|g| villa.max_guests >= g)
            && self.min_bedrooms.is_none_or(|b| villa.bedrooms >= b)
    }
}

/// Failure of a root-plus-dependents write. Nothing was committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositeError {
    #[error("root write failed: {0}")]
    Root(StoreError),

    #[error("dependent write failed: {0}")]
    Dependent(StoreError),
}

/// A root row written together with its dependent rows in one transaction.
#[async_trait]
pub trait CompositeStore<R: Sync, D: Sync>: Send + Sync {
    type Id: Copy + Send + Sync + core::fmt::Debug + core::fmt::Display;

    /// All-or-nothing insert of `root` and every dependent.
    async fn insert_with_dependents(&self, root: &R, dependents: &[D]) -> Result<Self::Id, CompositeError>;

    /// Remove the root and everything hanging off it. Removing a missing root
    /// succeeds.
    async fn delete_root(&self, id: Self::Id) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings of `villa_id` whose stay intersects `stay`.
    async fn find_overlapping(&self, villa_id: VillaId, stay: &StayRange) -> Result<Vec<Booking>, StoreError>;

    /// Check and insert under an exclusive per-villa lock.
    ///
    /// Fails with [`StoreError::Overlap`] when an intersecting booking exists.
    async fn insert_if_available(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn list(&self, page: Page) -> Result<Vec<Booking>, StoreError>;

    async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Booking>, StoreError>;

    /// Set `to` only if the stored status is still `from`.
    ///
    /// Fails with [`StoreError::StaleStatus`] if the status moved and
    /// [`StoreError::NotFound`] if the booking is gone.
    async fn update_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: BookingId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait VillaStore: CompositeStore<Villa, AmenityId, Id = VillaId> {
    async fn get(&self, id: VillaId) -> Result<Option<VillaDetails>, StoreError>;

    async fn list(&self, query: &VillaQuery) -> Result<Vec<VillaDetails>, StoreError>;

    /// Overwrite the villa row. Amenity links are untouched.
    async fn update(&self, villa: &Villa) -> Result<(), StoreError>;

    /// Remove the villa and its amenity links. Returns whether it existed.
    async fn delete(&self, id: VillaId) -> Result<bool, StoreError>;

    /// The subset of `keys` already attached to a stored villa.
    async fn referenced_images(&self, keys: &[String]) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait UserStore: CompositeStore<NewPrincipal, Invitation, Id = UserId> {
    async fn get(&self, id: UserId) -> Result<Option<Principal>, StoreError>;

    /// In one transaction: find an unexpired invitation by hash, mark the
    /// principal active and delete the invitation.
    ///
    /// Returns `None` when no unexpired invitation matches.
    async fn activate(&self, token_hash: &TokenHash, now: DateTime<Utc>) -> Result<Option<UserId>, StoreError>;

    /// Remove the principal and its invitation in one transaction. Returns
    /// whether the principal existed.
    /// Principal and password hash by email, for sign-in.
    async fn credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError>;

    async fn delete(&self, id: UserId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_by_name(&self, name: &RoleName) -> Result<Option<Role>, StoreError>;

    /// Insert unless a role with the same name exists. Returns whether it was
    /// inserted.
    async fn ensure(&self, role: &Role) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_category(&self, category: &Category) -> Result<(), StoreError>;
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;
    async fn delete_category(&self, id: CategoryId) -> Result<bool, StoreError>;

    async fn insert_location(&self, location: &Location) -> Result<(), StoreError>;
    async fn list_locations(&self) -> Result<Vec<Location>, StoreError>;
    async fn delete_location(&self, id: LocationId) -> Result<bool, StoreError>;

    async fn insert_amenity_type(&self, amenity_type: &AmenityType) -> Result<(), StoreError>;
    async fn list_amenity_types(&self) -> Result<Vec<AmenityType>, StoreError>;
    async fn delete_amenity_type(&self, id: AmenityTypeId) -> Result<bool, StoreError>;

    async fn insert_amenity(&self, amenity: &Amenity) -> Result<(), StoreError>;
    /// Amenities with `type_name` resolved.
    async fn list_amenities(&self) -> Result<Vec<Amenity>, StoreError>;
    async fn delete_amenity(&self, id: AmenityId) -> Result<bool, StoreError>;
}
