//! Booking use cases: access control, then the state machine, then the
//! gateway.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use villabook_auth::{BookingAction, Principal, RoleName};
use villabook_bookings::{
    Availability, Booking, BookingCommand, BookingEvent, BookingField, NewBooking, StayRange,
    next_status,
};
use villabook_core::{Aggregate, BookingId, ValidationRules, VillaId};
use villabook_infra::{AvailabilityChecker, BookingStore, Page, StoreError, VillaStore};

use crate::access::AccessControl;
use crate::error::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct BookingService {
    bookings: Arc<dyn BookingStore>,
    villas: Arc<dyn VillaStore>,
    availability: AvailabilityChecker,
    access: AccessControl,
    rules: ValidationRules,
}

impl BookingService {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        villas: Arc<dyn VillaStore>,
        access: AccessControl,
        rules: ValidationRules,
    ) -> Self {
        Self {
            availability: AvailabilityChecker::new(bookings.clone()),
            bookings,
            villas,
            access,
            rules,
        }
    }

    /// Advisory; [`BookingService::create`] re-checks atomically.
    pub async fn check_availability(&self, villa_id: VillaId, stay: &StayRange) -> ServiceResult<Availability> {
        Ok(self.availability.check(villa_id, stay).await?)
    }

    /// Book a villa for the acting principal.
    ///
    /// The villa snapshot and total price are taken from the stored villa.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.id, villa_id = %request.villa_id), err)]
    pub async fn create(&self, actor: &Principal, request: NewBooking) -> ServiceResult<Booking> {
        self.access.require(actor, &RoleName::USER).await?;

        let villa = self
            .villas
            .get(request.villa_id)
            .await?
            .ok_or_else(|| ServiceError::ReferenceNotFound(format!("villa {}", request.villa_id)))?;

        let booking = Booking::open(
            BookingId::new(),
            actor.id,
            request,
            &villa.snapshot(),
            &self.rules,
            Utc::now(),
        )?;

        // Fast path; the insert below is the authoritative check.
        if let Availability::Conflict { booking_id } = self.availability.check(booking.villa_id, &booking.stay).await? {
            return Err(ServiceError::Conflict {
                message: "villa is already booked for the requested dates".to_string(),
                conflicting: Some(booking_id),
            });
        }

        self.bookings.insert_if_available(&booking).await?;
        info!(booking_id = %booking.id, stay = %booking.stay, total_price = booking.total_price, "booking created");
        Ok(booking)
    }

    /// Owner or `admin`.
    pub async fn get(&self, actor: &Principal, id: BookingId) -> ServiceResult<Booking> {
        let booking = self.load(id).await?;
        self.access
            .require_for_booking(actor, booking.user_id, BookingAction::Read, &RoleName::ADMIN)
            .await?;
        Ok(booking)
    }

    /// Only the listed fields of one booking.
    pub async fn get_fields(&self, actor: &Principal, id: BookingId, fields: &[BookingField]) -> ServiceResult<Map<String, Value>> {
        Ok(self.get(actor, id).await?.project(fields))
    }

    /// All bookings. `admin` only.
    pub async fn list(&self, actor: &Principal, page: Page) -> ServiceResult<Vec<Booking>> {
        self.access.require(actor, &RoleName::ADMIN).await?;
        Ok(self.bookings.list(page).await?)
    }

    /// The acting principal's own bookings.
    pub async fn list_own(&self, actor: &Principal, page: Page) -> ServiceResult<Vec<Booking>> {
        self.access.require(actor, &RoleName::USER).await?;
        Ok(self.bookings.list_for_user(actor.id, page).await?)
    }

    /// `status` must be `"check_in"`.
    pub async fn check_in(&self, actor: &Principal, id: BookingId, status: &str) -> ServiceResult<Booking> {
        let command = BookingCommand::check_in(status, Utc::now());
        self.transition(actor, id, command, BookingAction::CheckIn).await
    }

    /// `status` must be `"complete"`.
    pub async fn check_out(&self, actor: &Principal, id: BookingId, status: &str) -> ServiceResult<Booking> {
        let command = BookingCommand::check_out(status, Utc::now());
        self.transition(actor, id, command, BookingAction::CheckOut).await
    }

    /// Always requires `admin`, even for the owner.
    #[instrument(skip(self, actor), fields(user_id = %actor.id, booking_id = %id), err)]
    pub async fn delete(&self, actor: &Principal, id: BookingId) -> ServiceResult<()> {
        let booking = self.load(id).await?;
        self.access
            .require_for_booking(actor, booking.user_id, BookingAction::Delete, &RoleName::ADMIN)
            .await?;

        if !self.bookings.delete(id).await? {
            return Err(ServiceError::NotFound);
        }
        info!(booking_id = %id, "booking deleted");
        Ok(())
    }

    #[instrument(skip(self, actor, command), fields(user_id = %actor.id, booking_id = %id, ?action), err)]
    async fn transition(
        &self,
        actor: &Principal,
        id: BookingId,
        command: BookingCommand,
        action: BookingAction,
    ) -> ServiceResult<Booking> {
        let mut booking = self.load(id).await?;
        self.access
            .require_for_booking(actor, booking.user_id, action, &RoleName::ADMIN)
            .await?;

        let events = booking.handle(&command)?;
        for event in &events {
            let BookingEvent::StatusChanged(change) = event;
            match self
                .bookings
                .update_status(booking.id, change.from, change.to, change.occurred_at)
                .await
            {
                Ok(()) => {}
                // Lost a race: judge the request against the status that won.
                Err(StoreError::StaleStatus { current }) => {
                    next_status(current, change.to)?;
                    return Err(StoreError::StaleStatus { current }.into());
                }
                Err(err) => return Err(err.into()),
            }
            booking.apply(event);
            info!(booking_id = %booking.id, from = %change.from, to = %change.to, "booking status changed");
        }
        Ok(booking)
    }

    async fn load(&self, id: BookingId) -> ServiceResult<Booking> {
        self.bookings.get(id).await?.ok_or(ServiceError::NotFound)
    }
}
