//! Postgres-backed persistence gateway.
//!
//! Every public call runs under [`with_timeout`]. Multi-row writes run in one
//! transaction and roll back explicitly on any failure.
//!
//! Booking inserts take a transaction-scoped advisory lock keyed by the villa,
//! re-check availability under the lock and only then insert. The
//! `bookings_no_overlap` exclusion constraint backs this up; if it ever fires
//! the error still maps to [`StoreError::Overlap`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use villabook_auth::{
    Credentials, Invitation, NewPrincipal, PasswordHash, Principal, Role, RoleLevel, RoleName,
    TokenHash,
};
use villabook_bookings::{Booking, BookingStatus, GuestDetails, StayRange};
use villabook_core::{
    AmenityId, AmenityTypeId, BookingId, CategoryId, LocationId, RoleId, UserId, VillaId,
};
use villabook_villas::{Amenity, AmenityType, Category, Location, Villa, VillaDetails};

use super::{
    BookingStore, CatalogStore, CompositeError, CompositeStore, Page, RoleStore, StoreError,
    UserStore, VillaQuery, VillaStore,
};
use crate::db::{map_delete_error, map_sqlx_error, with_timeout};

const BOOKING_COLUMNS: &str = r#"
    id, villa_id, user_id, start_at, end_at, status,
    villa_name, villa_location, nightly_price,
    first_name, last_name, email, guests, total_price,
    created_at, updated_at
"#;

const VILLA_SELECT: &str = r#"
    SELECT
        v.id, v.name, v.description, v.category_id, v.location_id,
        v.max_guests, v.bedrooms, v.baths, v.nightly_price, v.image_keys,
        v.created_at, v.updated_at,
        c.name AS category_name, c.created_at AS category_created_at,
        l.area AS location_area, l.created_at AS location_created_at
    FROM villas v
    JOIN categories c ON c.id = v.category_id
    JOIN locations l ON l.id = v.location_id
"#;

const AMENITY_SELECT: &str = r#"
    SELECT a.id, a.name, a.type_id, t.name AS type_name, a.created_at
    FROM amenities a
    LEFT JOIN amenity_types t ON t.id = a.type_id
"#;

/// Postgres persistence gateway.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    async fn timed<T, F>(&self, operation: &'static str, read_only: bool, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        with_timeout(operation, read_only, self.query_timeout, fut).await
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn rollback(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Database(format!("failed to decode {} row: {}", what, err))
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct BookingRow {
    id: Uuid,
    villa_id: Uuid,
    user_id: Uuid,
    start_at: NaiveDate,
    end_at: NaiveDate,
    status: String,
    villa_name: String,
    villa_location: String,
    nightly_price: i64,
    first_name: String,
    last_name: String,
    email: String,
    guests: i32,
    total_price: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for BookingRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BookingRow {
            id: row.try_get("id")?,
            villa_id: row.try_get("villa_id")?,
            user_id: row.try_get("user_id")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
            status: row.try_get("status")?,
            villa_name: row.try_get("villa_name")?,
            villa_location: row.try_get("villa_location")?,
            nightly_price: row.try_get("nightly_price")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            guests: row.try_get("guests")?,
            total_price: row.try_get("total_price")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let stay = StayRange::new(row.start_at, row.end_at).map_err(|e| corrupt("booking", e))?;
        let status = BookingStatus::from_label(&row.status)
            .ok_or_else(|| corrupt("booking", format!("unknown status '{}'", row.status)))?;

        Ok(Booking {
            id: BookingId::from_uuid(row.id),
            villa_id: VillaId::from_uuid(row.villa_id),
            user_id: UserId::from_uuid(row.user_id),
            stay,
            status,
            villa_name: row.villa_name,
            villa_location: row.villa_location,
            nightly_price: row.nightly_price,
            guest: GuestDetails {
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
            },
            guests: row.guests,
            total_price: row.total_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_bookings(rows: Vec<PgRow>) -> Result<Vec<Booking>, StoreError> {
    rows.iter()
        .map(|row| {
            BookingRow::from_row(row)
                .map_err(|e| corrupt("booking", e))
                .and_then(Booking::try_from)
        })
        .collect()
}

/// Villa row with its category and location joined in. Amenities are
/// attached separately.
fn decode_villa(row: &PgRow) -> Result<VillaDetails, sqlx::Error> {
    let category_id = CategoryId::from_uuid(row.try_get("category_id")?);
    let location_id = LocationId::from_uuid(row.try_get("location_id")?);
    let image_keys: Json<Vec<String>> = row.try_get("image_keys")?;

    Ok(VillaDetails {
        villa: Villa {
            id: VillaId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category_id,
            location_id,
            max_guests: row.try_get("max_guests")?,
            bedrooms: row.try_get("bedrooms")?,
            baths: row.try_get("baths")?,
            nightly_price: row.try_get("nightly_price")?,
            image_keys: image_keys.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        },
        category: Some(Category {
            id: category_id,
            name: row.try_get("category_name")?,
            created_at: row.try_get("category_created_at")?,
        }),
        location: Some(Location {
            id: location_id,
            area: row.try_get("location_area")?,
            created_at: row.try_get("location_created_at")?,
        }),
        amenities: Vec::new(),
    })
}

fn decode_amenity(row: &PgRow) -> Result<Amenity, sqlx::Error> {
    Ok(Amenity {
        id: AmenityId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        type_id: AmenityTypeId::from_uuid(row.try_get("type_id")?),
        type_name: row.try_get("type_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn decode_principal(row: &PgRow) -> Result<Principal, sqlx::Error> {
    let role_name: String = row.try_get("role_name")?;
    Ok(Principal {
        id: UserId::from_uuid(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: Role {
            id: RoleId::from_uuid(row.try_get("role_id")?),
            name: RoleName::new(role_name),
            level: RoleLevel::new(row.try_get("level")?),
            description: row.try_get("description")?,
        },
        is_active: row.try_get("is_active")?,
    })
}

fn decode_role(row: &PgRow) -> Result<Role, sqlx::Error> {
    let name: String = row.try_get("name")?;
    Ok(Role {
        id: RoleId::from_uuid(row.try_get("id")?),
        name: RoleName::new(name),
        level: RoleLevel::new(row.try_get("level")?),
        description: row.try_get("description")?,
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl PostgresStore {
    #[instrument(skip(self), fields(villa_id = %villa_id), err)]
    async fn select_overlapping(&self, villa_id: VillaId, stay: &StayRange) -> Result<Vec<Booking>, StoreError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE villa_id = $1 AND start_at < $3 AND end_at > $2 \
             ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(*villa_id.as_uuid())
            .bind(stay.start_at())
            .bind(stay.end_at())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_overlapping", e))?;
        decode_bookings(rows)
    }

    #[instrument(
        skip(self, booking),
        fields(booking_id = %booking.id, villa_id = %booking.villa_id, stay = %booking.stay),
        err
    )]
    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        // Serializes check-then-insert per villa for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(*booking.villa_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_villa", e))?;

        let conflicting: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM bookings
            WHERE villa_id = $1 AND start_at < $3 AND end_at > $2
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(*booking.villa_id.as_uuid())
        .bind(booking.stay.start_at())
        .bind(booking.stay.end_at())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("check_overlap", e))?;

        if let Some(id) = conflicting {
            rollback(tx).await?;
            return Err(StoreError::Overlap {
                conflicting: Some(BookingId::from_uuid(id)),
            });
        }

        let sql = format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        let inserted = sqlx::query(&sql)
            .bind(*booking.id.as_uuid())
            .bind(*booking.villa_id.as_uuid())
            .bind(*booking.user_id.as_uuid())
            .bind(booking.stay.start_at())
            .bind(booking.stay.end_at())
            .bind(booking.status.label())
            .bind(&booking.villa_name)
            .bind(&booking.villa_location)
            .bind(booking.nightly_price)
            .bind(&booking.guest.first_name)
            .bind(&booking.guest.last_name)
            .bind(&booking.guest.email)
            .bind(booking.guests)
            .bind(booking.total_price)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .execute(&mut *tx)
            .await;

        if let Err(e) = inserted {
            rollback(tx).await?;
            return Err(map_sqlx_error("insert_booking", e));
        }

        commit(tx).await
    }

    #[instrument(skip(self), fields(booking_id = %id), err)]
    async fn select_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let rows = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_booking", e))?;
        Ok(decode_bookings(rows)?.into_iter().next())
    }

    #[instrument(skip(self), err)]
    async fn select_bookings(&self, user_id: Option<UserId>, page: Page) -> Result<Vec<Booking>, StoreError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
             ORDER BY created_at, id \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.map(|id| *id.as_uuid()))
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_bookings", e))?;
        decode_bookings(rows)
    }

    #[instrument(skip(self), fields(booking_id = %id, from = %from, to = %to), err)]
    async fn conditional_status_update(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(*id.as_uuid())
        .bind(from.label())
        .bind(to.label())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_status", e))?;

        match current {
            None => Err(StoreError::NotFound),
            Some(label) => {
                let current = BookingStatus::from_label(&label)
                    .ok_or_else(|| corrupt("booking", format!("unknown status '{}'", label)))?;
                Err(StoreError::StaleStatus { current })
            }
        }
    }

    #[instrument(skip(self), fields(booking_id = %id), err)]
    async fn delete_booking(&self, id: BookingId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_delete_error("delete_booking", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn attach_amenities(&self, villas: &mut [VillaDetails]) -> Result<(), StoreError> {
        if villas.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = villas.iter().map(|v| *v.villa.id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT va.villa_id, a.id, a.name, a.type_id, t.name AS type_name, a.created_at
            FROM villa_amenities va
            JOIN amenities a ON a.id = va.amenity_id
            LEFT JOIN amenity_types t ON t.id = a.type_id
            WHERE va.villa_id = ANY($1)
            ORDER BY a.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_villa_amenities", e))?;

        let mut by_villa: HashMap<Uuid, Vec<Amenity>> = HashMap::new();
        for row in &rows {
            let villa_id: Uuid = row.try_get("villa_id").map_err(|e| corrupt("villa_amenity", e))?;
            let amenity = decode_amenity(row).map_err(|e| corrupt("amenity", e))?;
            by_villa.entry(villa_id).or_default().push(amenity);
        }

        for details in villas.iter_mut() {
            details.amenities = by_villa.remove(details.villa.id.as_uuid()).unwrap_or_default();
        }
        Ok(())
    }

    #[instrument(skip(self, villa, amenities), fields(villa_id = %villa.id, amenity_count = amenities.len()))]
    async fn insert_villa(&self, villa: &Villa, amenities: &[AmenityId]) -> Result<VillaId, CompositeError> {
        let mut tx = self.begin().await.map_err(CompositeError::Root)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO villas (
                id, name, description, category_id, location_id,
                max_guests, bedrooms, baths, nightly_price, image_keys,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(*villa.id.as_uuid())
        .bind(&villa.name)
        .bind(&villa.description)
        .bind(*villa.category_id.as_uuid())
        .bind(*villa.location_id.as_uuid())
        .bind(villa.max_guests)
        .bind(villa.bedrooms)
        .bind(villa.baths)
        .bind(villa.nightly_price)
        .bind(Json(&villa.image_keys))
        .bind(villa.created_at)
        .bind(villa.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            rollback(tx).await.map_err(CompositeError::Root)?;
            return Err(CompositeError::Root(map_sqlx_error("insert_villa", e)));
        }

        for amenity_id in amenities {
            let linked = sqlx::query("INSERT INTO villa_amenities (villa_id, amenity_id) VALUES ($1, $2)")
                .bind(*villa.id.as_uuid())
                .bind(*amenity_id.as_uuid())
                .execute(&mut *tx)
                .await;

            if let Err(e) = linked {
                rollback(tx).await.map_err(CompositeError::Root)?;
                return Err(CompositeError::Dependent(map_sqlx_error("insert_villa_amenity", e)));
            }
        }

        commit(tx).await.map_err(CompositeError::Root)?;
        Ok(villa.id)
    }

    #[instrument(skip(self), fields(villa_id = %id), err)]
    async fn select_villa(&self, id: VillaId) -> Result<Option<VillaDetails>, StoreError> {
        let sql = format!("{VILLA_SELECT} WHERE v.id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_villa", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut villas = vec![decode_villa(&row).map_err(|e| corrupt("villa", e))?];
        self.attach_amenities(&mut villas).await?;
        Ok(villas.pop())
    }

    #[instrument(skip(self), err)]
    async fn select_villas(&self, query: &VillaQuery) -> Result<Vec<VillaDetails>, StoreError> {
        let direction = if query.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "{VILLA_SELECT} \
             WHERE ($1::uuid IS NULL OR v.category_id = $1) \
               AND ($2::uuid IS NULL OR v.location_id = $2) \
               AND ($3::int IS NULL OR v.max_guests >= $3) \
               AND ($4::int IS NULL OR v.bedrooms >= $4) \
             ORDER BY v.created_at {direction}, v.id {direction} \
             LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query(&sql)
            .bind(query.category_id.map(|id| *id.as_uuid()))
            .bind(query.location_id.map(|id| *id.as_uuid()))
            .bind(query.min_guests)
            .bind(query.min_bedrooms)
            .bind(i64::from(query.page.limit))
            .bind(i64::from(query.page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_villas", e))?;

        let mut villas = rows
            .iter()
            .map(|row| decode_villa(row).map_err(|e| corrupt("villa", e)))
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_amenities(&mut villas).await?;
        Ok(villas)
    }

    #[instrument(skip(self, villa), fields(villa_id = %villa.id), err)]
    async fn update_villa(&self, villa: &Villa) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE villas SET
                name = $2, description = $3, category_id = $4, location_id = $5,
                max_guests = $6, bedrooms = $7, baths = $8, nightly_price = $9,
                image_keys = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(*villa.id.as_uuid())
        .bind(&villa.name)
        .bind(&villa.description)
        .bind(*villa.category_id.as_uuid())
        .bind(*villa.location_id.as_uuid())
        .bind(villa.max_guests)
        .bind(villa.bedrooms)
        .bind(villa.baths)
        .bind(villa.nightly_price)
        .bind(Json(&villa.image_keys))
        .bind(villa.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_villa", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(villa_id = %id), err)]
    async fn delete_villa(&self, id: VillaId) -> Result<bool, StoreError> {
        // Amenity links go with the villa (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM villas WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_delete_error("delete_villa", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(
        skip(self, principal, invitations),
        fields(user_id = %principal.id, role = %principal.role)
    )]
    async fn insert_principal(
        &self,
        principal: &NewPrincipal,
        invitations: &[Invitation],
    ) -> Result<UserId, CompositeError> {
        let mut tx = self.begin().await.map_err(CompositeError::Root)?;

        let role_id: Option<Uuid> = match sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
            .bind(principal.role.as_str())
            .fetch_optional(&mut *tx)
            .await
        {
            Ok(role_id) => role_id,
            Err(e) => {
                rollback(tx).await.map_err(CompositeError::Root)?;
                return Err(CompositeError::Root(map_sqlx_error("resolve_role", e)));
            }
        };

        let Some(role_id) = role_id else {
            rollback(tx).await.map_err(CompositeError::Root)?;
            return Err(CompositeError::Root(StoreError::ReferenceNotFound {
                constraint: "users_role_id_fkey".to_string(),
            }));
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, role_id, password_hash, is_active)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            "#,
        )
        .bind(*principal.id.as_uuid())
        .bind(&principal.username)
        .bind(&principal.email)
        .bind(role_id)
        .bind(principal.password_hash.as_str())
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            rollback(tx).await.map_err(CompositeError::Root)?;
            return Err(CompositeError::Root(map_sqlx_error("insert_user", e)));
        }

        for invitation in invitations {
            let inserted = sqlx::query(
                "INSERT INTO user_invitations (token_hash, user_id, expires_at) VALUES ($1, $2, $3)",
            )
            .bind(invitation.token_hash.as_str())
            .bind(*invitation.user_id.as_uuid())
            .bind(invitation.expires_at)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                rollback(tx).await.map_err(CompositeError::Root)?;
                return Err(CompositeError::Dependent(map_sqlx_error("insert_invitation", e)));
            }
        }

        commit(tx).await.map_err(CompositeError::Root)?;
        Ok(principal.id)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn select_principal(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.username, u.email, u.is_active,
                   r.id AS role_id, r.name AS role_name, r.level, r.description
            FROM users u
            JOIN roles r ON r.id = u.role_id
            WHERE u.id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?;

        row.as_ref()
            .map(decode_principal)
            .transpose()
            .map_err(|e| corrupt("user", e))
    }

    #[instrument(skip(self, email), err)]
    async fn select_credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.username, u.email, u.is_active, u.password_hash,
                   r.id AS role_id, r.name AS role_name, r.level, r.description
            FROM users u
            JOIN roles r ON r.id = u.role_id
            WHERE u.email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_credentials", e))?;

        row.as_ref()
            .map(|row| -> Result<Credentials, sqlx::Error> {
                let password_hash: String = row.try_get("password_hash")?;
                Ok(Credentials {
                    principal: decode_principal(row)?,
                    password_hash: PasswordHash::from_phc(password_hash),
                })
            })
            .transpose()
            .map_err(|e| corrupt("user", e))
    }

    #[instrument(skip(self, token_hash), err)]
    async fn consume_invitation(&self, token_hash: &TokenHash, now: DateTime<Utc>) -> Result<Option<UserId>, StoreError> {
        let mut tx = self.begin().await?;

        let user_id: Option<Uuid> = match sqlx::query_scalar(
            "SELECT user_id FROM user_invitations WHERE token_hash = $1 AND expires_at > $2 FOR UPDATE",
        )
        .bind(token_hash.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        {
            Ok(user_id) => user_id,
            Err(e) => {
                rollback(tx).await?;
                return Err(map_sqlx_error("find_invitation", e));
            }
        };

        let Some(user_id) = user_id else {
            rollback(tx).await?;
            return Ok(None);
        };

        let activated = sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await;
        if let Err(e) = activated {
            rollback(tx).await?;
            return Err(map_sqlx_error("activate_user", e));
        }

        let consumed = sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await;
        if let Err(e) = consumed {
            rollback(tx).await?;
            return Err(map_sqlx_error("delete_invitation", e));
        }

        commit(tx).await?;
        Ok(Some(UserId::from_uuid(user_id)))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_principal(&self, id: UserId) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let invitations = sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
            .bind(*id.as_uuid())
            .execute(&mut *tx)
            .await;
        if let Err(e) = invitations {
            rollback(tx).await?;
            return Err(map_sqlx_error("delete_invitation", e));
        }

        let removed = match sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&mut *tx)
            .await
        {
            Ok(result) => result.rows_affected() > 0,
            Err(e) => {
                rollback(tx).await?;
                return Err(map_delete_error("delete_user", e));
            }
        };

        commit(tx).await?;
        Ok(removed)
    }

    async fn insert_named(&self, operation: &'static str, sql: &str, id: Uuid, name: &str, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(sql)
            .bind(id)
            .bind(name)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }

    async fn delete_by_id(&self, operation: &'static str, sql: &str, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_delete_error(operation, e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_rows(&self, operation: &'static str, sql: &str) -> Result<Vec<PgRow>, StoreError> {
        sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl BookingStore for PostgresStore {
    async fn find_overlapping(&self, villa_id: VillaId, stay: &StayRange) -> Result<Vec<Booking>, StoreError> {
        self.timed("find_overlapping", true, self.select_overlapping(villa_id, stay))
            .await
    }

    async fn insert_if_available(&self, booking: &Booking) -> Result<(), StoreError> {
        self.timed("insert_booking", false, self.insert_booking(booking)).await
    }

    async fn get(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.timed("get_booking", true, self.select_booking(id)).await
    }

    async fn list(&self, page: Page) -> Result<Vec<Booking>, StoreError> {
        self.timed("list_bookings", true, self.select_bookings(None, page)).await
    }

    async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Booking>, StoreError> {
        self.timed("list_user_bookings", true, self.select_bookings(Some(user_id), page))
            .await
    }

    async fn update_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.timed("update_status", false, self.conditional_status_update(id, from, to, at))
            .await
    }

    async fn delete(&self, id: BookingId) -> Result<bool, StoreError> {
        self.timed("delete_booking", false, self.delete_booking(id)).await
    }
}

#[async_trait]
impl CompositeStore<Villa, AmenityId> for PostgresStore {
    type Id = VillaId;

    async fn insert_with_dependents(&self, villa: &Villa, amenities: &[AmenityId]) -> Result<VillaId, CompositeError> {
        self.timed("insert_villa", false, async {
            Ok::<_, StoreError>(self.insert_villa(villa, amenities).await)
        })
        .await
        .map_err(CompositeError::Root)?
    }

    async fn delete_root(&self, id: VillaId) -> Result<(), StoreError> {
        self.timed("delete_villa", false, self.delete_villa(id))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl VillaStore for PostgresStore {
    async fn get(&self, id: VillaId) -> Result<Option<VillaDetails>, StoreError> {
        self.timed("get_villa", true, self.select_villa(id)).await
    }

    async fn list(&self, query: &VillaQuery) -> Result<Vec<VillaDetails>, StoreError> {
        self.timed("list_villas", true, self.select_villas(query)).await
    }

    async fn update(&self, villa: &Villa) -> Result<(), StoreError> {
        self.timed("update_villa", false, self.update_villa(villa)).await
    }

    async fn delete(&self, id: VillaId) -> Result<bool, StoreError> {
        self.timed("delete_villa", false, self.delete_villa(id)).await
    }

    async fn referenced_images(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.timed("referenced_images", true, async {
            sqlx::query_scalar::<_, String>(
                r#"
                SELECT DISTINCT k
                FROM villas, jsonb_array_elements_text(villas.image_keys) AS k
                WHERE k = ANY($1)
                "#,
            )
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("referenced_images", e))
        })
        .await
    }
}

#[async_trait]
impl CompositeStore<NewPrincipal, Invitation> for PostgresStore {
    type Id = UserId;

    async fn insert_with_dependents(
        &self,
        principal: &NewPrincipal,
        invitations: &[Invitation],
    ) -> Result<UserId, CompositeError> {
        self.timed("insert_user", false, async {
            Ok::<_, StoreError>(self.insert_principal(principal, invitations).await)
        })
        .await
        .map_err(CompositeError::Root)?
    }

    async fn delete_root(&self, id: UserId) -> Result<(), StoreError> {
        self.timed("delete_user", false, self.delete_principal(id))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get(&self, id: UserId) -> Result<Option<Principal>, StoreError> {
        self.timed("get_user", true, self.select_principal(id)).await
    }

    async fn activate(&self, token_hash: &TokenHash, now: DateTime<Utc>) -> Result<Option<UserId>, StoreError> {
        self.timed("activate_user", false, self.consume_invitation(token_hash, now))
            .await
    }

    async fn credentials(&self, email: &str) -> Result<Option<Credentials>, StoreError> {
        self.timed("get_credentials", true, self.select_credentials(email)).await
    }

    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        self.timed("delete_user", false, self.delete_principal(id)).await
    }
}

#[async_trait]
impl RoleStore for PostgresStore {
    async fn get_by_name(&self, name: &RoleName) -> Result<Option<Role>, StoreError> {
        self.timed("get_role", true, async {
            let row = sqlx::query("SELECT id, name, level, description FROM roles WHERE name = $1")
                .bind(name.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_role", e))?;
            row.as_ref()
                .map(decode_role)
                .transpose()
                .map_err(|e| corrupt("role", e))
        })
        .await
    }

    async fn ensure(&self, role: &Role) -> Result<bool, StoreError> {
        self.timed("ensure_role", false, async {
            let result = sqlx::query(
                r#"
                INSERT INTO roles (id, name, level, description)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(*role.id.as_uuid())
            .bind(role.name.as_str())
            .bind(role.level.value())
            .bind(&role.description)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_role", e))?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn insert_category(&self, category: &Category) -> Result<(), StoreError> {
        self.timed(
            "insert_category",
            false,
            self.insert_named(
                "insert_category",
                "INSERT INTO categories (id, name, created_at) VALUES ($1, $2, $3)",
                *category.id.as_uuid(),
                &category.name,
                category.created_at,
            ),
        )
        .await
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        self.timed("list_categories", true, async {
            let rows = self
                .fetch_rows("list_categories", "SELECT id, name, created_at FROM categories ORDER BY name")
                .await?;
            rows.iter()
                .map(|row| {
                    Ok(Category {
                        id: CategoryId::from_uuid(row.try_get("id")?),
                        name: row.try_get("name")?,
                        created_at: row.try_get("created_at")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| corrupt("category", e))
        })
        .await
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool, StoreError> {
        self.timed(
            "delete_category",
            false,
            self.delete_by_id("delete_category", "DELETE FROM categories WHERE id = $1", *id.as_uuid()),
        )
        .await
    }

    async fn insert_location(&self, location: &Location) -> Result<(), StoreError> {
        self.timed(
            "insert_location",
            false,
            self.insert_named(
                "insert_location",
                "INSERT INTO locations (id, area, created_at) VALUES ($1, $2, $3)",
                *location.id.as_uuid(),
                &location.area,
                location.created_at,
            ),
        )
        .await
    }

    async fn list_locations(&self) -> Result<Vec<Location>, StoreError> {
        self.timed("list_locations", true, async {
            let rows = self
                .fetch_rows("list_locations", "SELECT id, area, created_at FROM locations ORDER BY area")
                .await?;
            rows.iter()
                .map(|row| {
                    Ok(Location {
                        id: LocationId::from_uuid(row.try_get("id")?),
                        area: row.try_get("area")?,
                        created_at: row.try_get("created_at")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| corrupt("location", e))
        })
        .await
    }

    async fn delete_location(&self, id: LocationId) -> Result<bool, StoreError> {
        self.timed(
            "delete_location",
            false,
            self.delete_by_id("delete_location", "DELETE FROM locations WHERE id = $1", *id.as_uuid()),
        )
        .await
    }

    async fn insert_amenity_type(&self, amenity_type: &AmenityType) -> Result<(), StoreError> {
        self.timed(
            "insert_amenity_type",
            false,
            self.insert_named(
                "insert_amenity_type",
                "INSERT INTO amenity_types (id, name, created_at) VALUES ($1, $2, $3)",
                *amenity_type.id.as_uuid(),
                &amenity_type.name,
                amenity_type.created_at,
            ),
        )
        .await
    }

    async fn list_amenity_types(&self) -> Result<Vec<AmenityType>, StoreError> {
        self.timed("list_amenity_types", true, async {
            let rows = self
                .fetch_rows(
                    "list_amenity_types",
                    "SELECT id, name, created_at FROM amenity_types ORDER BY name",
                )
                .await?;
            rows.iter()
                .map(|row| {
                    Ok(AmenityType {
                        id: AmenityTypeId::from_uuid(row.try_get("id")?),
                        name: row.try_get("name")?,
                        created_at: row.try_get("created_at")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| corrupt("amenity_type", e))
        })
        .await
    }

    async fn delete_amenity_type(&self, id: AmenityTypeId) -> Result<bool, StoreError> {
        self.timed(
            "delete_amenity_type",
            false,
            self.delete_by_id(
                "delete_amenity_type",
                "DELETE FROM amenity_types WHERE id = $1",
                *id.as_uuid(),
            ),
        )
        .await
    }

    async fn insert_amenity(&self, amenity: &Amenity) -> Result<(), StoreError> {
        self.timed("insert_amenity", false, async {
            sqlx::query("INSERT INTO amenities (id, name, type_id, created_at) VALUES ($1, $2, $3, $4)")
                .bind(*amenity.id.as_uuid())
                .bind(&amenity.name)
                .bind(*amenity.type_id.as_uuid())
                .bind(amenity.created_at)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("insert_amenity", e))?;
            Ok(())
        })
        .await
    }

    async fn list_amenities(&self) -> Result<Vec<Amenity>, StoreError> {
        self.timed("list_amenities", true, async {
            let sql = format!("{AMENITY_SELECT} ORDER BY a.name");
            let rows = self.fetch_rows("list_amenities", &sql).await?;
            rows.iter()
                .map(decode_amenity)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| corrupt("amenity", e))
        })
        .await
    }

    async fn delete_amenity(&self, id: AmenityId) -> Result<bool, StoreError> {
        self.timed(
            "delete_amenity",
            false,
            self.delete_by_id("delete_amenity", "DELETE FROM amenities WHERE id = $1", *id.as_uuid()),
        )
        .await
    }
}
