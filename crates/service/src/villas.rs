use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use villabook_auth::{Principal, RoleName};
use villabook_core::{ValidationRules, VillaId};
use villabook_infra::images::{ImageStore, remove_all};
use villabook_infra::{VillaQuery, VillaStore, create_with_dependents};
use villabook_villas::{NewVilla, VillaDetails, VillaPatch};

use crate::access::AccessControl;
use crate::error::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct VillaService {
    villas: Arc<dyn VillaStore>,
    images: Arc<dyn ImageStore>,
    access: AccessControl,
    rules: ValidationRules,
}

impl VillaService {
    pub fn new(
        villas: Arc<dyn VillaStore>,
        images: Arc<dyn ImageStore>,
        access: AccessControl,
        rules: ValidationRules,
    ) -> Self {
        Self {
            villas,
            images,
            access,
            rules,
        }
    }

    /// Store an uploaded image and return its key. `admin` only.
    pub async fn upload_image(&self, actor: &Principal, original_name: &str, bytes: &[u8]) -> ServiceResult<String> {
        self.access.require(actor, &RoleName::ADMIN).await?;
        Ok(self.images.save(original_name, bytes).await?)
    }

    /// Create a villa with its amenity links in one transaction. `admin` only.
    ///
    /// Every image key must name an uploaded image that no other villa uses.
    /// If creation fails after authorization, the referenced images are
    /// removed again, except those another villa still holds.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.id, name = %request.name), err)]
    pub async fn create(&self, actor: &Principal, request: NewVilla) -> ServiceResult<VillaDetails> {
        self.access.require(actor, &RoleName::ADMIN).await?;
        let image_keys = request.image_keys.clone();

        match self.try_create(request).await {
            Ok(details) => Ok(details),
            Err(err) => {
                self.discard_images(&image_keys).await;
                Err(err)
            }
        }
    }

    async fn try_create(&self, request: NewVilla) -> ServiceResult<VillaDetails> {
        request.validate(&self.rules)?;
        self.check_images(&request.image_keys).await?;

        let (villa, amenity_ids) = request.into_parts(VillaId::new(), Utc::now());
        let id = create_with_dependents(self.villas.as_ref(), &villa, &amenity_ids).await?;
        info!(villa_id = %id, amenities = amenity_ids.len(), "villa created");

        self.villas
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::internal(format!("villa {id} vanished after commit")))
    }

    async fn check_images(&self, keys: &[String]) -> ServiceResult<()> {
        for key in keys {
            if !self.images.exists(key).await? {
                return Err(ServiceError::Validation(format!("image '{key}' was never uploaded")));
            }
        }
        let taken = self.villas.referenced_images(keys).await?;
        if let Some(key) = taken.first() {
            return Err(ServiceError::conflict(format!("image '{key}' belongs to another villa")));
        }
        Ok(())
    }

    /// Best effort. Keys still attached to a stored villa are kept.
    async fn discard_images(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let orphans: Vec<String> = match self.villas.referenced_images(keys).await {
            Ok(taken) => keys.iter().filter(|k| !taken.contains(*k)).cloned().collect(),
            Err(err) => {
                warn!(error = %err, "could not check image ownership; keeping uploaded images");
                return;
            }
        };
        if !orphans.is_empty() {
            warn!(images = orphans.len(), "villa not created; removing uploaded images");
            remove_all(self.images.as_ref(), &orphans).await;
        }
    }

    /// Only the supplied fields change. `admin` only.
    #[instrument(skip(self, actor, patch), fields(user_id = %actor.id, villa_id = %id), err)]
    pub async fn update(&self, actor: &Principal, id: VillaId, patch: VillaPatch) -> ServiceResult<VillaDetails> {
        self.access.require(actor, &RoleName::ADMIN).await?;

        let mut villa = self.villas.get(id).await?.ok_or(ServiceError::NotFound)?.villa;
        villa.apply_patch(patch, &self.rules, Utc::now())?;
        self.villas.update(&villa).await?;

        self.villas.get(id).await?.ok_or(ServiceError::NotFound)
    }

    /// Remove a villa, its amenity links and its images. `admin` only.
    ///
    /// A villa that still has bookings cannot be deleted.
    #[instrument(skip(self, actor), fields(user_id = %actor.id, villa_id = %id), err)]
    pub async fn delete(&self, actor: &Principal, id: VillaId) -> ServiceResult<()> {
        self.access.require(actor, &RoleName::ADMIN).await?;

        let details = self.villas.get(id).await?.ok_or(ServiceError::NotFound)?;
        if !self.villas.delete(id).await? {
            return Err(ServiceError::NotFound);
        }
        remove_all(self.images.as_ref(), &details.villa.image_keys).await;
        info!(villa_id = %id, "villa deleted");
        Ok(())
    }

    pub async fn get(&self, id: VillaId) -> ServiceResult<VillaDetails> {
        self.villas.get(id).await?.ok_or(ServiceError::NotFound)
    }

    pub async fn list(&self, query: &VillaQuery) -> ServiceResult<Vec<VillaDetails>> {
        Ok(self.villas.list(query).await?)
    }
}
