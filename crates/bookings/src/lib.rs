//! Villa reservations.
//!
//! Pure domain logic: the stay range, the availability predicate, the booking
//! lifecycle and explicit read projections. No IO, no storage.

pub mod availability;
pub mod booking;
pub mod projection;
pub mod stay;

pub use availability::{Availability, check_availability};
pub use booking::{
    Booking, BookingCommand, BookingEvent, BookingStatus, ChangeStatus, GuestDetails, NewBooking,
    StatusChanged, VillaSnapshot, next_status,
};
pub use projection::{BookingField, BookingSummary};
pub use stay::StayRange;
