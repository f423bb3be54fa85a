use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use villabook_bookings::VillaSnapshot;
use villabook_core::{
    AmenityId, CategoryId, DomainError, DomainResult, Entity, LocationId, ValidationRules, VillaId,
};

use crate::{Amenity, Category, Location};

/// Villa creation request: the root row plus its amenity links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVilla {
    pub name: String,
    pub description: String,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub max_guests: i32,
    pub bedrooms: i32,
    pub baths: i32,
    /// Nightly price in minor currency units.
    pub nightly_price: i64,
    pub amenity_ids: Vec<AmenityId>,
    /// Keys of already uploaded images, in display order.
    pub image_keys: Vec<String>,
}

impl NewVilla {
    pub fn validate(&self, rules: &ValidationRules) -> DomainResult<()> {
        rules.villa_name(&self.name)?;
        rules.villa_description(&self.description)?;
        rules.positive("max_guests", self.max_guests)?;
        rules.positive("bedrooms", self.bedrooms)?;
        rules.positive("baths", self.baths)?;
        rules.positive("nightly_price", self.nightly_price)?;
        if self.image_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(DomainError::validation("image keys must not be blank"));
        }
        Ok(())
    }

    /// Split into the root row and its dependents.
    pub fn into_parts(self, id: VillaId, now: DateTime<Utc>) -> (Villa, Vec<AmenityId>) {
        let villa = Villa {
            id,
            name: self.name,
            description: self.description,
            category_id: self.category_id,
            location_id: self.location_id,
            max_guests: self.max_guests,
            bedrooms: self.bedrooms,
            baths: self.baths,
            nightly_price: self.nightly_price,
            image_keys: self.image_keys,
            created_at: now,
            updated_at: now,
        };
        (villa, self.amenity_ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Villa {
    pub id: VillaId,
    pub name: String,
    pub description: String,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub max_guests: i32,
    pub bedrooms: i32,
    pub baths: i32,
    pub nightly_price: i64,
    pub image_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Villa {
    type Id = VillaId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Villa {
    /// Apply only the supplied fields, then revalidate the result.
    ///
    /// On error `self` is left unchanged.
    pub fn apply_patch(
        &mut self,
        patch: VillaPatch,
        rules: &ValidationRules,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if patch.is_empty() {
            return Err(DomainError::validation("patch contains no fields"));
        }

        let mut next = self.clone();
        if let Some(name) = patch.name {
            rules.villa_name(&name)?;
            next.name = name;
        }
        if let Some(description) = patch.description {
            rules.villa_description(&description)?;
            next.description = description;
        }
        if let Some(category_id) = patch.category_id {
            next.category_id = category_id;
        }
        if let Some(location_id) = patch.location_id {
            next.location_id = location_id;
        }
        if let Some(max_guests) = patch.max_guests {
            rules.positive("max_guests", max_guests)?;
            next.max_guests = max_guests;
        }
        if let Some(bedrooms) = patch.bedrooms {
            rules.positive("bedrooms", bedrooms)?;
            next.bedrooms = bedrooms;
        }
        if let Some(baths) = patch.baths {
            rules.positive("baths", baths)?;
            next.baths = baths;
        }
        if let Some(price) = patch.nightly_price {
            rules.positive("nightly_price", price)?;
            next.nightly_price = price;
        }
        next.updated_at = now;

        *self = next;
        Ok(())
    }
}

/// Partial villa update. `None` leaves the field as is.
///
/// Amenity links and images are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillaPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<CategoryId>,
    pub location_id: Option<LocationId>,
    pub max_guests: Option<i32>,
    pub bedrooms: Option<i32>,
    pub baths: Option<i32>,
    pub nightly_price: Option<i64>,
}

impl VillaPatch {
    pub fn is_empty(&self) -> bool {
        *self == VillaPatch::default()
    }
}

/// A villa with its references resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillaDetails {
    #[serde(flatten)]
    pub villa: Villa,
    pub category: Option<Category>,
    pub location: Option<Location>,
    pub amenities: Vec<Amenity>,
}

impl VillaDetails {
    /// Attributes copied onto a booking.
    pub fn snapshot(&self) -> VillaSnapshot {
        VillaSnapshot {
            name: self.villa.name.clone(),
            location: self
                .location
                .as_ref()
                .map(|l| l.area.clone())
                .unwrap_or_default(),
            nightly_price: self.villa.nightly_price,
            max_guests: self.villa.max_guests,
        }
    }
}
