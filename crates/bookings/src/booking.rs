use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use villabook_core::{
    Aggregate, AggregateRoot, BookingId, DomainError, DomainResult, Entity, UserId,
    ValidationRules, VillaId,
};

use crate::StayRange;

/// Booking lifecycle: `Open -> CheckedIn -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "check_in")]
    CheckedIn,
    #[serde(rename = "complete")]
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 3] = [
        BookingStatus::Open,
        BookingStatus::CheckedIn,
        BookingStatus::Completed,
    ];

    /// Wire label; also the value callers must supply to request a transition.
    pub fn label(self) -> &'static str {
        match self {
            BookingStatus::Open => "open",
            BookingStatus::CheckedIn => "check_in",
            BookingStatus::Completed => "complete",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

impl core::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Transition table. Every (current, requested) pair has exactly one outcome.
pub fn next_status(current: BookingStatus, requested: BookingStatus) -> DomainResult<BookingStatus> {
    use BookingStatus::*;

    match (current, requested) {
        (Open, CheckedIn) | (CheckedIn, Completed) => Ok(requested),
        (Open, Open) => Err(DomainError::invalid_transition("booking is already open")),
        (Open, Completed) => Err(DomainError::invalid_transition("must check in first")),
        (CheckedIn, Open) => Err(DomainError::invalid_transition(
            "cannot reopen a checked-in booking",
        )),
        (CheckedIn, CheckedIn) => Err(DomainError::invalid_transition("already checked in")),
        (Completed, Open) => Err(DomainError::invalid_transition("booking is completed")),
        (Completed, CheckedIn) => Err(DomainError::invalid_transition(
            "cannot check in after check out",
        )),
        (Completed, Completed) => Err(DomainError::invalid_transition("already checked out")),
    }
}

/// Guest contact captured on the booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Villa attributes copied onto the booking at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillaSnapshot {
    pub name: String,
    pub location: String,
    /// Nightly price in minor currency units.
    pub nightly_price: i64,
    pub max_guests: i32,
}

/// Booking request as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub villa_id: VillaId,
    pub stay: StayRange,
    pub guest: GuestDetails,
    pub guests: i32,
}

/// Aggregate root: Booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub villa_id: VillaId,
    pub user_id: UserId,
    pub stay: StayRange,
    pub status: BookingStatus,
    pub villa_name: String,
    pub villa_location: String,
    pub nightly_price: i64,
    pub guest: GuestDetails,
    pub guests: i32,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Build an `Open` booking owned by `owner`.
    pub fn open(
        id: BookingId,
        owner: UserId,
        request: NewBooking,
        villa: &VillaSnapshot,
        rules: &ValidationRules,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        rules.guest_name("first_name", &request.guest.first_name)?;
        rules.guest_name("last_name", &request.guest.last_name)?;
        rules.email(&request.guest.email)?;

        if request.guests < 1 {
            return Err(DomainError::validation("guests must be at least 1"));
        }
        if request.guests > villa.max_guests {
            return Err(DomainError::validation(format!(
                "guests must be at most {}",
                villa.max_guests
            )));
        }
        rules.positive("nightly_price", villa.nightly_price)?;

        let total_price = villa
            .nightly_price
            .checked_mul(request.stay.nights())
            .ok_or_else(|| DomainError::validation("total_price overflows"))?;

        Ok(Self {
            id,
            villa_id: request.villa_id,
            user_id: owner,
            stay: request.stay,
            status: BookingStatus::Open,
            villa_name: villa.name.clone(),
            villa_location: villa.location.clone(),
            nightly_price: villa.nightly_price,
            guest: request.guest,
            guests: request.guests,
            total_price,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

impl Entity for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Status change request carrying the caller-supplied label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub status: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingCommand {
    CheckIn(ChangeStatus),
    CheckOut(ChangeStatus),
}

impl BookingCommand {
    pub fn check_in(status: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        BookingCommand::CheckIn(ChangeStatus {
            status: status.into(),
            occurred_at,
        })
    }

    pub fn check_out(status: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        BookingCommand::CheckOut(ChangeStatus {
            status: status.into(),
            occurred_at,
        })
    }

    /// The only label accepted by this command.
    fn expected(&self) -> BookingStatus {
        match self {
            BookingCommand::CheckIn(_) => BookingStatus::CheckedIn,
            BookingCommand::CheckOut(_) => BookingStatus::Completed,
        }
    }

    fn change(&self) -> &ChangeStatus {
        match self {
            BookingCommand::CheckIn(c) | BookingCommand::CheckOut(c) => c,
        }
    }
}

/// Event: StatusChanged. `from` is the precondition for the conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub booking_id: BookingId,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    StatusChanged(StatusChanged),
}

impl Aggregate for Booking {
    type Command = BookingCommand;
    type Event = BookingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BookingEvent::StatusChanged(e) => {
                self.status = e.to;
                self.updated_at = e.occurred_at;
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let expected = command.expected();
        let change = command.change();

        // Label check runs before the state guard.
        if change.status != expected.label() {
            return Err(DomainError::validation(format!(
                "status must be '{}'",
                expected.label()
            )));
        }

        let to = next_status(self.status, expected)?;

        Ok(vec![BookingEvent::StatusChanged(StatusChanged {
            booking_id: self.id,
            from: self.status,
            to,
            occurred_at: change.occurred_at,
        })])
    }
}
