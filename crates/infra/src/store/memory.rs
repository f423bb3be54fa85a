use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use villabook_auth::{
    Credentials, Invitation, NewPrincipal, PasswordHash, Principal, Role, RoleName, TokenHash,
};
use villabook_bookings::{Availability, Booking, BookingStatus, StayRange, check_availability};
use villabook_core::{
    AmenityId, AmenityTypeId, BookingId, CategoryId, LocationId, UserId, VillaId,
};
use villabook_villas::{Amenity, AmenityType, Category, Location, Villa, VillaDetails};

use super::{
    BookingStore, CatalogStore, CompositeError, CompositeStore, Page, RoleStore, StoreError,
    UserStore, VillaQuery, VillaStore,
};

#[derive(Debug, Clone)]
struct UserRow {
    id: UserId,
    username: String,
    email: String,
    role: RoleName,
    is_active: bool,
    password_hash: PasswordHash,
}

#[derive(Debug, Default)]
struct Tables {
    roles: HashMap<RoleName, Role>,
    users: BTreeMap<UserId, UserRow>,
    invitations: HashMap<TokenHash, Invitation>,
    categories: BTreeMap<CategoryId, Category>,
    locations: BTreeMap<LocationId, Location>,
    amenity_types: BTreeMap<AmenityTypeId, AmenityType>,
    amenities: BTreeMap<AmenityId, Amenity>,
    villas: BTreeMap<VillaId, Villa>,
    villa_amenities: BTreeSet<(VillaId, AmenityId)>,
    bookings: BTreeMap<BookingId, Booking>,
}

/// In-memory persistence gateway.
///
/// Intended for tests/dev. A single lock guards all tables, so every write is
/// atomic and check-then-insert sequences cannot interleave.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }
}

fn duplicate(constraint: &str) -> StoreError {
    StoreError::Duplicate {
        constraint: constraint.to_string(),
    }
}

fn missing(constraint: &str) -> StoreError {
    StoreError::ReferenceNotFound {
        constraint: constraint.to_string(),
    }
}

fn in_use(constraint: &str) -> StoreError {
    StoreError::InUse {
        constraint: constraint.to_string(),
    }
}

fn paginate<T>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    rows.skip(page.offset as usize).take(page.limit as usize).collect()
}

impl Tables {
    fn principal(&self, row: &UserRow) -> Result<Principal, StoreError> {
        let role = self
            .roles
            .get(&row.role)
            .cloned()
            .ok_or_else(|| StoreError::Database(format!("user {} has unknown role", row.id)))?;
        Ok(Principal {
            id: row.id,
            username: row.username.clone(),
            email: row.email.clone(),
            role,
            is_active: row.is_active,
        })
    }

    fn amenity_with_type(&self, amenity: &Amenity) -> Amenity {
        let mut resolved = amenity.clone();
        resolved.type_name = self
            .amenity_types
            .get(&amenity.type_id)
            .map(|t| t.name.clone());
        resolved
    }

    fn details(&self, villa: &Villa) -> VillaDetails {
        let amenities = self
            .villa_amenities
            .iter()
            .filter(|(v, _)| *v == villa.id)
            .filter_map(|(_, a)| self.amenities.get(a))
            .map(|a| self.amenity_with_type(a))
            .collect();

        VillaDetails {
            villa: villa.clone(),
            category: self.categories.get(&villa.category_id).cloned(),
            location: self.locations.get(&villa.location_id).cloned(),
            amenities,
        }
    }

    fn check_villa_refs(&self, villa: &Villa) -> Result<(), StoreError> {
        if !self.categories.contains_key(&villa.category_id) {
            return Err(missing("villas_category_id_fkey"));
        }
        if !self.locations.contains_key(&villa.location_id) {
            return Err(missing("villas_location_id_fkey"));
        }
        Ok(())
    }

    fn remove_user(&mut self, id: UserId) -> Result<bool, StoreError> {
        if !self.users.contains_key(&id) {
            return Ok(false);
        }
        if self.bookings.values().any(|b| b.user_id == id) {
            return Err(in_use("bookings_user_id_fkey"));
        }
        self.invitations.retain(|_, inv| inv.user_id != id);
        self.users.remove(&id);
        Ok(true)
    }

    fn remove_villa(&mut self, id: VillaId) -> Result<bool, StoreError> {
        if !self.villas.contains_key(&id) {
            return Ok(false);
        }
        if self.bookings.values().any(|b| b.villa_id == id) {
            return Err(in_use("bookings_villa_id_fkey"));
        }
        self.villa_amenities.retain(|(v, _)| *v != id);
        self.villas.remove(&id);
        Ok(true)
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn find_overlapping(&self, villa_id: VillaId, stay: &StayRange) -> Result<Vec<Booking>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .bookings
            .values()
            .filter(|b| b.villa_id == villa_id && b.stay.intersects(stay))
            .cloned()
            .collect())
    }

    async fn insert_if_available(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        if tables.bookings.contains_key(&booking.id) {
            return Err(duplicate("bookings_pkey"));
        }
        if !tables.villas.contains_key(&booking.villa_id) {
            return Err(missing("bookings_villa_id_fkey"));
        }
        if !tables.users.contains_key(&booking.user_id) {
            return Err(missing("bookings_user_id_fkey"));
        }

        let same_villa = tables
            .bookings
            .values()
            .filter(|b| b.villa_id == booking.villa_id);
        if let Availability::Conflict { booking_id } = check_availability(&booking.stay, same_villa) {
            return Err(StoreError::Overlap {
                conflicting: Some(booking_id),
            });
        }

        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.read()?.bookings.get(&id).cloned())
    }

    async fn list(&self, page: Page) -> Result<Vec<Booking>, StoreError> {
        let tables = self.read()?;
        Ok(paginate(tables.bookings.values().cloned(), page))
    }

    async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Booking>, StoreError> {
        let tables = self.read()?;
        let rows = tables
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned();
        Ok(paginate(rows, page))
    }

    async fn update_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let booking = tables.bookings.get_mut(&id).ok_or(StoreError::NotFound)?;
        if booking.status != from {
            return Err(StoreError::StaleStatus {
                current: booking.status,
            });
        }
        booking.status = to;
        booking.updated_at = at;
        Ok(())
    }

    async fn delete(&self, id: BookingId) -> Result<bool, StoreError> {
        Ok(self.write()?.bookings.remove(&id).is_some())
    }
}

#[async_trait]
impl CompositeStore<Villa, AmenityId> for InMemoryStore {
    type Id = VillaId;

    async fn insert_with_dependents(&self, villa: &Villa, amenities: &[AmenityId]) -> Result<VillaId, CompositeError> {
        let mut tables = self.write().map_err(CompositeError::Root)?;

        if tables.villas.contains_key(&villa.id) {
            return Err(CompositeError::Root(duplicate("villas_pkey")));
        }
        if tables.villas.values().any(|v| v.name == villa.name) {
            return Err(CompositeError::Root(duplicate("villas_name_key")));
        }
        tables.check_villa_refs(villa).map_err(CompositeError::Root)?;

        let mut links = BTreeSet::new();
        for amenity_id in amenities {
            if !tables.amenities.contains_key(amenity_id) {
                return Err(CompositeError::Dependent(missing(
                    "villa_amenities_amenity_id_fkey",
                )));
            }
            if !links.insert((villa.id, *amenity_id)) {
                return Err(CompositeError::Dependent(duplicate("villa_amenities_pkey")));
            }
        }

        tables.villas.insert(villa.id, villa.clone());
        tables.villa_amenities.extend(links);
        Ok(villa.id)
    }

    async fn delete_root(&self, id: VillaId) -> Result<(), StoreError> {
        self.write()?.remove_villa(id).map(|_| ())
    }
}

#[async_trait]
impl VillaStore for InMemoryStore {
    async fn get(&self, id: VillaId) -> Result<Option<VillaDetails>, StoreError> {
        let tables = self.read()?;
        Ok(tables.villas.get(&id).map(|v| tables.details(v)))
    }

    async fn list(&self, query: &VillaQuery) -> Result<Vec<VillaDetails>, StoreError> {
        let tables = self.read()?;
        let mut villas: Vec<&Villa> = tables.villas.values().filter(|v| query.matches(v)).collect();
        villas.sort_by_key(|v| (v.created_at, v.id));
        if query.descending {
            villas.reverse();
        }
        Ok(paginate(villas.into_iter().map(|v| tables.details(v)), query.page))
    }

    async fn update(&self, villa: &Villa) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.villas.contains_key(&villa.id) {
            return Err(StoreError::NotFound);
        }
        if tables
            .villas
            .values()
            .any(|v| v.id != villa.id && v.name == villa.name)
        {
            return Err(duplicate("villas_name_key"));
        }
        tables.check_villa_refs(villa)?;
        tables.villas.insert(villa.id, villa.clone());
        Ok(())
    }

    async fn delete(&self, id: VillaId) -> Result<bool, StoreError> {
        self.write()?.remove_villa(id)
    }

    async fn referenced_images(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        let tables = self.read()?;
        Ok(keys
            .iter()
            .filter(|key| tables.villas.values().any(|v| v.image_keys.contains(*key)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CompositeStore<NewPrincipal, Invitation> for InMemoryStore {
    type Id = UserId;

    async fn insert_with_dependents(
        &self,
        principal: &NewPrincipal,
        invitations: &[Invitation],
    ) -> Result<UserId, CompositeError> {
        let mut tables = self.write().map_err(CompositeError::Root)?;

        if !tables.roles.contains_key(&principal.role) {
            return Err(CompositeError::Root(missing("users_role_id_fkey")));
        }
        if tables.users.contains_key(&principal.id) {
            return Err(CompositeError::Root(duplicate("users_pkey")));
        }
        if tables.users.values().any(|u| u.username == principal.username) {
            return Err(CompositeError::Root(duplicate("users_username_key")));
        }
        if tables.users.values().any(|u| u.email == principal.email) {
            return Err(CompositeError::Root(duplicate("users_email_key")));
        }

        let mut hashes = BTreeSet::new();
        for invitation in invitations {
            if invitation.user_id != principal.id {
                return Err(CompositeError::Dependent(missing(
                    "user_invitations_user_id_fkey",
                )));
            }
            if tables.invitations.contains_key(&invitation.token_hash)
                || !hashes.insert(invitation.token_hash.as_str())
            {
                return Err(CompositeError::Dependent(duplicate("user_invitations_pkey")));
            }
        }

        tables.users.insert(
            principal.id,
            UserRow {
                id: principal.id,
                username: principal.username.clone(),
                email: principal.email.clone(),
                role: principal.role.clone(),
                is_active: false,
                password_hash: principal.password_hash.clone(),
            },
        );
        for invitation in invitations {
            tables
                .invitations
                .insert(invitation.token_hash.clone(), invitation.clone());
        }
        Ok(principal.id)
    }

    async fn delete_root(&self, id: UserId) -> Result<(), StoreError> {
        self.write()?.remove_user(id).map(|_| ())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        let tables = self.read()?;
        tables.users.get(&id).map(|row| tables.principal(row)).transpose()
    }

    async fn activate(&self, token_hash: &TokenHash, now: DateTime<Utc>) -> Result<Option<UserId>, StoreError> {
        let mut tables = self.write()?;

        let Some(invitation) = tables.invitations.get(token_hash) else {
            return Ok(None);
        };
        if invitation.is_expired(now) {
            return Ok(None);
        }
        let user_id = invitation.user_id;

        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.is_active = true;
        tables.invitations.retain(|_, inv| inv.user_id != user_id);
        Ok(Some(user_id))
    }

    async fn credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        let tables = self.read()?;
        let Some(row) = tables.users.values().find(|u| u.email == email) else {
            return Ok(None);
        };
        Ok(Some(Credentials {
            principal: tables.principal(row)?,
            password_hash: row.password_hash.clone(),
        }))
    }

    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        self.write()?.remove_user(id)
    }
}

#[async_trait]
impl RoleStore for InMemoryStore {
    async fn get_by_name(&self, name: &RoleName) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.get(name).cloned())
    }

    async fn ensure(&self, role: &Role) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.roles.contains_key(&role.name) {
            return Ok(false);
        }
        tables.roles.insert(role.name.clone(), role.clone());
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn insert_category(&self, category: &Category) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.categories.values().any(|c| c.name == category.name) {
            return Err(duplicate("categories_name_key"));
        }
        tables.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let mut rows: Vec<_> = self.read()?.categories.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.villas.values().any(|v| v.category_id == id) {
            return Err(in_use("villas_category_id_fkey"));
        }
        Ok(tables.categories.remove(&id).is_some())
    }

    async fn insert_location(&self, location: &Location) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.locations.values().any(|l| l.area == location.area) {
            return Err(duplicate("locations_area_key"));
        }
        tables.locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn list_locations(&self) -> Result<Vec<Location>, StoreError> {
        let mut rows: Vec<_> = self.read()?.locations.values().cloned().collect();
        rows.sort_by(|a, b| a.area.cmp(&b.area));
        Ok(rows)
    }

    async fn delete_location(&self, id: LocationId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.villas.values().any(|v| v.location_id == id) {
            return Err(in_use("villas_location_id_fkey"));
        }
        Ok(tables.locations.remove(&id).is_some())
    }

    async fn insert_amenity_type(&self, amenity_type: &AmenityType) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.amenity_types.values().any(|t| t.name == amenity_type.name) {
            return Err(duplicate("amenity_types_name_key"));
        }
        tables.amenity_types.insert(amenity_type.id, amenity_type.clone());
        Ok(())
    }

    async fn list_amenity_types(&self) -> Result<Vec<AmenityType>, StoreError> {
        let mut rows: Vec<_> = self.read()?.amenity_types.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn delete_amenity_type(&self, id: AmenityTypeId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.amenities.values().any(|a| a.type_id == id) {
            return Err(in_use("amenities_type_id_fkey"));
        }
        Ok(tables.amenity_types.remove(&id).is_some())
    }

    async fn insert_amenity(&self, amenity: &Amenity) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.amenities.values().any(|a| a.name == amenity.name) {
            return Err(duplicate("amenities_name_key"));
        }
        if !tables.amenity_types.contains_key(&amenity.type_id) {
            return Err(missing("amenities_type_id_fkey"));
        }
        tables.amenities.insert(amenity.id, amenity.clone());
        Ok(())
    }

    async fn list_amenities(&self) -> Result<Vec<Amenity>, StoreError> {
        let tables = self.read()?;
        let mut rows: Vec<Amenity> = tables
            .amenities
            .values()
            .map(|a| tables.amenity_with_type(a))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn delete_amenity(&self, id: AmenityId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        if tables.villa_amenities.iter().any(|(_, a)| *a == id) {
            return Err(in_use("villa_amenities_amenity_id_fkey"));
        }
        Ok(tables.amenities.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use villabook_auth::RoleLevel;
    use villabook_bookings::{GuestDetails, NewBooking, VillaSnapshot};
    use villabook_core::ValidationRules;

    fn stored_hash() -> PasswordHash {
        PasswordHash::from_phc("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA")
    }

    struct Fixture {
        store: InMemoryStore,
        villa: Villa,
        user: UserId,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let rules = ValidationRules::default();
        let now = Utc::now();

        RoleStore::ensure(&store, &Role::new(RoleName::USER, RoleLevel::new(1), "guest"))
            .await
            .unwrap();
        let category = Category::new("Beachfront", &rules, now).unwrap();
        let location = Location::new("Canggu", &rules, now).unwrap();
        store.insert_category(&category).await.unwrap();
        store.insert_location(&location).await.unwrap();

        let villa = Villa {
            id: VillaId::new(),
            name: "Villa Batu".to_string(),
            description: "Quiet villa by the rice fields".to_string(),
            category_id: category.id,
            location_id: location.id,
            max_guests: 4,
            bedrooms: 2,
            baths: 1,
            nightly_price: 10_000,
            image_keys: vec![],
            created_at: now,
            updated_at: now,
        };
        CompositeStore::<Villa, AmenityId>::insert_with_dependents(&store, &villa, &[])
            .await
            .unwrap();

        let principal = NewPrincipal::new("komang", "komang@example.com", RoleName::USER, stored_hash());
        let user = CompositeStore::<NewPrincipal, Invitation>::insert_with_dependents(
            &store,
            &principal,
            &[],
        )
        .await
        .unwrap();

        Fixture { store, villa, user }
    }

    fn booking(f: &Fixture, start: &str, end: &str) -> Booking {
        Booking::open(
            BookingId::new(),
            f.user,
            NewBooking {
                villa_id: f.villa.id,
                stay: StayRange::parse(start, end).unwrap(),
                guest: GuestDetails {
                    first_name: "Komang".to_string(),
                    last_name: "Ayu".to_string(),
                    email: "komang@example.com".to_string(),
                },
                guests: 2,
            },
            &VillaSnapshot {
                name: f.villa.name.clone(),
                location: "Canggu".to_string(),
                nightly_price: f.villa.nightly_price,
                max_guests: f.villa.max_guests,
            },
            &ValidationRules::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn overlapping_insert_reports_conflicting_booking() {
        let f = fixture().await;
        let first = booking(&f, "2025-06-01", "2025-06-05");
        f.store.insert_if_available(&first).await.unwrap();

        let err = f
            .store
            .insert_if_available(&booking(&f, "2025-06-04", "2025-06-06"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Overlap { conflicting: Some(first.id) });

        f.store
            .insert_if_available(&booking(&f, "2025-06-05", "2025-06-06"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conditional_status_update() {
        let f = fixture().await;
        let b = booking(&f, "2025-07-01", "2025-07-03");
        f.store.insert_if_available(&b).await.unwrap();

        f.store
            .update_status(b.id, BookingStatus::Open, BookingStatus::CheckedIn, Utc::now())
            .await
            .unwrap();

        let err = f
            .store
            .update_status(b.id, BookingStatus::Open, BookingStatus::CheckedIn, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::StaleStatus { current: BookingStatus::CheckedIn });

        let err = f
            .store
            .update_status(BookingId::new(), BookingStatus::Open, BookingStatus::CheckedIn, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn unknown_amenity_leaves_no_villa_behind() {
        let f = fixture().await;
        let mut villa = f.villa.clone();
        villa.id = VillaId::new();
        villa.name = "Villa Dua".to_string();

        let err = CompositeStore::<Villa, AmenityId>::insert_with_dependents(
            &f.store,
            &villa,
            &[AmenityId::new()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CompositeError::Dependent(StoreError::ReferenceNotFound { .. })));
        assert!(VillaStore::get(&f.store, villa.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn villa_with_bookings_cannot_be_deleted() {
        let f = fixture().await;
        f.store
            .insert_if_available(&booking(&f, "2025-08-01", "2025-08-02"))
            .await
            .unwrap();

        let err = VillaStore::delete(&f.store, f.villa.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InUse { .. }));
    }

    #[tokio::test]
    async fn activation_consumes_invitation_once() {
        let f = fixture().await;
        let principal = NewPrincipal::new("made", "made@example.com", RoleName::USER, stored_hash());
        let now = Utc::now();
        let (token, invitation) = Invitation::issue(principal.id, Duration::hours(1), now).unwrap();

        CompositeStore::<NewPrincipal, Invitation>::insert_with_dependents(&f.store, &principal, &[invitation])
            .await
            .unwrap();

        assert_eq!(f.store.activate(&token.hash(), now).await.unwrap(), Some(principal.id));
        assert_eq!(f.store.activate(&token.hash(), now).await.unwrap(), None);

        let active = UserStore::get(&f.store, principal.id).await.unwrap().unwrap();
        assert!(active.is_active);
    }

    #[tokio::test]
    async fn expired_invitation_does_not_activate() {
        let f = fixture().await;
        let principal = NewPrincipal::new("nyoman", "nyoman@example.com", RoleName::USER, stored_hash());
        let issued = Utc::now();
        let (token, invitation) = Invitation::issue(principal.id, Duration::hours(1), issued).unwrap();
        CompositeStore::<NewPrincipal, Invitation>::insert_with_dependents(&f.store, &principal, &[invitation])
            .await
            .unwrap();

        let later = issued + Duration::hours(2);
        assert_eq!(f.store.activate(&token.hash(), later).await.unwrap(), None);
        assert!(!UserStore::get(&f.store, principal.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn credentials_are_found_by_email() {
        let f = fixture().await;

        let found = f.store.credentials("komang@example.com").await.unwrap().unwrap();
        assert_eq!(found.principal.id, f.user);
        assert_eq!(found.password_hash, stored_hash());
        assert!(f.store.credentials("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn referenced_images_reports_only_attached_keys() {
        let f = fixture().await;
        let mut villa = f.villa.clone();
        villa.image_keys = vec!["front.jpg".to_string()];
        VillaStore::update(&f.store, &villa).await.unwrap();

        let keys = vec!["front.jpg".to_string(), "fresh.jpg".to_string()];
        assert_eq!(
            f.store.referenced_images(&keys).await.unwrap(),
            vec!["front.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn deleting_a_missing_principal_is_a_no_op() {
        let f = fixture().await;
        assert!(!UserStore::delete(&f.store, UserId::new()).await.unwrap());
        CompositeStore::<NewPrincipal, Invitation>::delete_root(&f.store, UserId::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_username_is_root_duplicate() {
        let f = fixture().await;
        let clash = NewPrincipal::new("komang", "other@example.com", RoleName::USER, stored_hash());
        let err = CompositeStore::<NewPrincipal, Invitation>::insert_with_dependents(&f.store, &clash, &[])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CompositeError::Root(StoreError::Duplicate {
                constraint: "users_username_key".to_string()
            })
        );
    }

    mod admission {
        use super::*;
        use chrono::NaiveDate;
        use proptest::prelude::*;

        fn date(offset: i64) -> String {
            let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
            (base + Duration::days(offset)).format("%Y-%m-%d").to_string()
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: whatever order requests arrive in, admitted stays never share a night.
            #[test]
            fn admitted_stays_are_disjoint(requests in prop::collection::vec((0i64..60, 1i64..10), 1..16)) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let admitted = rt.block_on(async {
                    let f = fixture().await;
                    for (start, nights) in &requests {
                        let candidate = booking(&f, &date(*start), &date(start + nights));
                        match f.store.insert_if_available(&candidate).await {
                            Ok(()) | Err(StoreError::Overlap { .. }) => {}
                            Err(other) => panic!("unexpected {other:?}"),
                        }
                    }
                    BookingStore::list(&f.store, Page::new(Page::MAX_LIMIT, 0)).await.unwrap()
                });

                prop_assert!(!admitted.is_empty());
                for (i, a) in admitted.iter().enumerate() {
                    for b in &admitted[i + 1..] {
                        prop_assert!(!a.stay.intersects(&b.stay), "{} and {} overlap", a.stay, b.stay);
                    }
                }
            }
        }
    }
}
