//! Categories, locations, amenity types and amenities.
//!
//! Reads are public; writes require `admin`. Rows still referenced by a villa
//! (or, for types, by an amenity) cannot be deleted.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use villabook_auth::{Principal, RoleName};
use villabook_core::{AmenityId, AmenityTypeId, CategoryId, LocationId, ValidationRules};
use villabook_infra::CatalogStore;
use villabook_villas::{Amenity, AmenityType, Category, Location, NewAmenity};

use crate::access::AccessControl;
use crate::error::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<dyn CatalogStore>,
    access: AccessControl,
    rules: ValidationRules,
}

fn found(removed: bool) -> ServiceResult<()> {
    if removed { Ok(()) } else { Err(ServiceError::NotFound) }
}

impl CatalogService {
    pub fn new(catalog: Arc<dyn CatalogStore>, access: AccessControl, rules: ValidationRules) -> Self {
        Self { catalog, access, rules }
    }

    async fn require_admin(&self, actor: &Principal) -> ServiceResult<()> {
        self.access.require(actor, &RoleName::ADMIN).await.map(|_| ())
    }

    pub async fn create_category(&self, actor: &Principal, name: &str) -> ServiceResult<Category> {
        self.require_admin(actor).await?;
        let category = Category::new(name, &self.rules, Utc::now())?;
        self.catalog.insert_category(&category).await?;
        info!(category_id = %category.id, name = %category.name, "category created");
        Ok(category)
    }

    pub async fn list_categories(&self) -> ServiceResult<Vec<Category>> {
        Ok(self.catalog.list_categories().await?)
    }

    pub async fn delete_category(&self, actor: &Principal, id: CategoryId) -> ServiceResult<()> {
        self.require_admin(actor).await?;
        found(self.catalog.delete_category(id).await?)
    }

    pub async fn create_location(&self, actor: &Principal, area: &str) -> ServiceResult<Location> {
        self.require_admin(actor).await?;
        let location = Location::new(area, &self.rules, Utc::now())?;
        self.catalog.insert_location(&location).await?;
        info!(location_id = %location.id, area = %location.area, "location created");
        Ok(location)
    }

    pub async fn list_locations(&self) -> ServiceResult<Vec<Location>> {
        Ok(self.catalog.list_locations().await?)
    }

    pub async fn delete_location(&self, actor: &Principal, id: LocationId) -> ServiceResult<()> {
        self.require_admin(actor).await?;
        found(self.catalog.delete_location(id).await?)
    }

    pub async fn create_amenity_type(&self, actor: &Principal, name: &str) -> ServiceResult<AmenityType> {
        self.require_admin(actor).await?;
        let amenity_type = AmenityType::new(name, &self.rules, Utc::now())?;
        self.catalog.insert_amenity_type(&amenity_type).await?;
        info!(amenity_type_id = %amenity_type.id, name = %amenity_type.name, "amenity type created");
        Ok(amenity_type)
    }

    pub async fn list_amenity_types(&self) -> ServiceResult<Vec<AmenityType>> {
        Ok(self.catalog.list_amenity_types().await?)
    }

    pub async fn delete_amenity_type(&self, actor: &Principal, id: AmenityTypeId) -> ServiceResult<()> {
        self.require_admin(actor).await?;
        found(self.catalog.delete_amenity_type(id).await?)
    }

    /// The amenity type must exist.
    pub async fn create_amenity(&self, actor: &Principal, request: NewAmenity) -> ServiceResult<Amenity> {
        self.require_admin(actor).await?;
        let amenity = Amenity::new(request, &self.rules, Utc::now())?;
        self.catalog.insert_amenity(&amenity).await?;
        info!(amenity_id = %amenity.id, name = %amenity.name, "amenity created");
        Ok(amenity)
    }

    pub async fn list_amenities(&self) -> ServiceResult<Vec<Amenity>> {
        Ok(self.catalog.list_amenities().await?)
    }

    pub async fn delete_amenity(&self, actor: &Principal, id: AmenityId) -> ServiceResult<()> {
        self.require_admin(actor).await?;
        found(self.catalog.delete_amenity(id).await?)
    }
}
