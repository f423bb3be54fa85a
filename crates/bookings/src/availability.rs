use serde::Serialize;

use villabook_core::BookingId;

use crate::{Booking, StayRange};

/// Outcome of an availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Availability {
    Available,
    /// An existing booking intersects the candidate stay.
    Conflict { booking_id: BookingId },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Decide whether `candidate` can be admitted next to `existing`.
///
/// `existing` must already be narrowed to the villa in question. Every stored
/// booking blocks its dates, whatever its status; there is no cancelled state.
/// The first intersecting booking (by id) is reported.
pub fn check_availability<'a, I>(candidate: &StayRange, existing: I) -> Availability
where
    I: IntoIterator<Item = &'a Booking>,
{
    existing
        .into_iter()
        .filter(|b| b.stay.intersects(candidate))
        .map(|b| b.id)
        .min()
        .map_or(Availability::Available, |booking_id| Availability::Conflict { booking_id })
}
