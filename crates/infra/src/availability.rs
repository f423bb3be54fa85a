use std::sync::Arc;

use tracing::instrument;

use villabook_bookings::{Availability, StayRange, check_availability};
use villabook_core::VillaId;

use crate::store::{BookingStore, StoreError};

/// Read-only availability lookup for a villa.
///
/// The answer is advisory: it can be stale by the time a booking is written.
/// [`BookingStore::insert_if_available`] re-checks under the villa lock.
#[derive(Clone)]
pub struct AvailabilityChecker {
    bookings: Arc<dyn BookingStore>,
}

impl AvailabilityChecker {
    pub fn new(bookings: Arc<dyn BookingStore>) -> Self {
        Self { bookings }
    }

    #[instrument(skip(self), fields(villa_id = %villa_id, stay = %stay), err)]
    pub async fn check(&self, villa_id: VillaId, stay: &StayRange) -> Result<Availability, StoreError> {
        let overlapping = self.bookings.find_overlapping(villa_id, stay).await?;
        Ok(check_availability(stay, &overlapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn empty_store_is_available() {
        let checker = AvailabilityChecker::new(Arc::new(InMemoryStore::new()));
        let stay = StayRange::parse("2025-06-01", "2025-06-05").unwrap();

        let answer = checker.check(VillaId::new(), &stay).await.unwrap();
        assert_eq!(answer, Availability::Available);
    }
}
