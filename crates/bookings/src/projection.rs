//! Narrowed read views of a booking.
//!
//! Views are built field by field. Adding a field to `Booking` does not leak
//! it into any view until it is listed here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use villabook_core::{BookingId, VillaId};

use crate::{Booking, BookingStatus};

/// Listing view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub id: BookingId,
    pub villa_id: VillaId,
    pub villa_name: String,
    pub start_at: NaiveDate,
    pub end_at: NaiveDate,
    pub status: BookingStatus,
    pub guests: i32,
    pub total_price: i64,
}

impl From<&Booking> for BookingSummary {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            villa_id: b.villa_id,
            villa_name: b.villa_name.clone(),
            start_at: b.stay.start_at(),
            end_at: b.stay.end_at(),
            status: b.status,
            guests: b.guests,
            total_price: b.total_price,
        }
    }
}

/// Selectable booking fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingField {
    Id,
    VillaId,
    UserId,
    StartAt,
    EndAt,
    Status,
    VillaName,
    VillaLocation,
    VillaPrice,
    FirstName,
    LastName,
    Email,
    Guests,
    TotalPrice,
}

impl BookingField {
    pub fn key(self) -> &'static str {
        match self {
            BookingField::Id => "id",
            BookingField::VillaId => "villa_id",
            BookingField::UserId => "user_id",
            BookingField::StartAt => "start_at",
            BookingField::EndAt => "end_at",
            BookingField::Status => "status",
            BookingField::VillaName => "villa_name",
            BookingField::VillaLocation => "villa_location",
            BookingField::VillaPrice => "villa_price",
            BookingField::FirstName => "first_name",
            BookingField::LastName => "last_name",
            BookingField::Email => "email",
            BookingField::Guests => "guests",
            BookingField::TotalPrice => "total_price",
        }
    }

    fn value(self, b: &Booking) -> Value {
        match self {
            BookingField::Id => json!(b.id),
            BookingField::VillaId => json!(b.villa_id),
            BookingField::UserId => json!(b.user_id),
            BookingField::StartAt => json!(b.stay.start_at()),
            BookingField::EndAt => json!(b.stay.end_at()),
            BookingField::Status => json!(b.status),
            BookingField::VillaName => json!(b.villa_name),
            BookingField::VillaLocation => json!(b.villa_location),
            BookingField::VillaPrice => json!(b.nightly_price),
            BookingField::FirstName => json!(b.guest.first_name),
            BookingField::LastName => json!(b.guest.last_name),
            BookingField::Email => json!(b.guest.email),
            BookingField::Guests => json!(b.guests),
            BookingField::TotalPrice => json!(b.total_price),
        }
    }
}

impl Booking {
    /// Only the listed fields. Duplicates collapse.
    pub fn project(&self, fields: &[BookingField]) -> Map<String, Value> {
        fields
            .iter()
            .map(|f| (f.key().to_string(), f.value(self)))
            .collect()
    }
}
