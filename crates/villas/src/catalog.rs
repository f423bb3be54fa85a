use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use villabook_core::{
    AmenityId, AmenityTypeId, CategoryId, DomainResult, Entity, LocationId, ValidationRules,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: &str, rules: &ValidationRules, now: DateTime<Utc>) -> DomainResult<Self> {
        rules.catalog_name("name", name)?;
        Ok(Self {
            id: CategoryId::new(),
            name: name.trim().to_string(),
            created_at: now,
        })
    }
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A named area (e.g. "Ubud").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub area: String,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn new(area: &str, rules: &ValidationRules, now: DateTime<Utc>) -> DomainResult<Self> {
        rules.catalog_name("area", area)?;
        Ok(Self {
            id: LocationId::new(),
            area: area.trim().to_string(),
            created_at: now,
        })
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Amenity grouping (e.g. "Outdoor", "Kitchen").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmenityType {
    pub id: AmenityTypeId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl AmenityType {
    pub fn new(name: &str, rules: &ValidationRules, now: DateTime<Utc>) -> DomainResult<Self> {
        rules.catalog_name("name", name)?;
        Ok(Self {
            id: AmenityTypeId::new(),
            name: name.trim().to_string(),
            created_at: now,
        })
    }
}

impl Entity for AmenityType {
    type Id = AmenityTypeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Amenity creation request. The type must already exist; the store checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAmenity {
    pub name: String,
    pub type_id: AmenityTypeId,
}

/// An amenity belongs to exactly one type. Names are unique across the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenity {
    pub id: AmenityId,
    pub name: String,
    pub type_id: AmenityTypeId,
    /// Resolved type name, filled on reads.
    pub type_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Amenity {
    pub fn new(request: NewAmenity, rules: &ValidationRules, now: DateTime<Utc>) -> DomainResult<Self> {
        rules.catalog_name("name", &request.name)?;
        Ok(Self {
            id: AmenityId::new(),
            name: request.name.trim().to_string(),
            type_id: request.type_id,
            type_name: None,
            created_at: now,
        })
    }
}

impl Entity for Amenity {
    type Id = AmenityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
