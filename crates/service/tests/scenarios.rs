use std::sync::Arc;

use chrono::{Duration, Utc};

use villabook_auth::{AccessGrant, JwtClaims, Principal, Role, RoleLevel, RoleName};
use villabook_bookings::{BookingField, BookingStatus, GuestDetails, NewBooking, StayRange};
use villabook_core::{AmenityId, ValidationRules};
use villabook_infra::images::InMemoryImageStore;
use villabook_infra::schema::seed_roles;
use villabook_infra::{InMemoryStore, MailError, Page, RoleStore, ScriptedSender, SentMessage, VillaQuery};
use villabook_service::{
    Backends, InvitationSettings, ServiceError, ServiceSettings, Services,
};
use villabook_villas::{NewAmenity, NewVilla, VillaDetails, VillaPatch};

struct TestApp {
    services: Services,
    store: Arc<InMemoryStore>,
    mailer: Arc<ScriptedSender>,
    images: Arc<InMemoryImageStore>,
    admin: Principal,
}

impl TestApp {
    async fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::new());
        seed_roles(store.as_ref()).await.unwrap();

        let mailer = Arc::new(ScriptedSender::new());
        let images = Arc::new(InMemoryImageStore::new());
        let settings = ServiceSettings {
            rules: ValidationRules::default(),
            invitations: InvitationSettings {
                client_url: "http://client.test".to_string(),
                ttl: Duration::hours(1),
                template: "user_invitation".to_string(),
                sandbox: true,
            },
            token_ttl: Duration::hours(2),
        };
        let services = Services::new(
            Backends::shared(store.clone(), images.clone(), mailer.clone()),
            settings,
        );

        services
            .users
            .bootstrap_admin("root", "root@villabook.test", PASSWORD)
            .await
            .unwrap();
        let token = activation_token(&last_message(&mailer));
        services.users.activate(&token).await.unwrap();
        let admin = sign_in(&services, "root@villabook.test").await;

        Self {
            services,
            store,
            mailer,
            images,
            admin,
        }
    }

    /// Register, activate and sign in a `user`.
    async fn sign_up(&self, username: &str) -> Principal {
        let email = format!("{username}@example.com");
        self.services.users.register(username, &email, PASSWORD).await.unwrap();
        let token = activation_token(&last_message(&self.mailer));
        self.services.users.activate(&token).await.unwrap();
        sign_in(&self.services, &email).await
    }

    async fn villa(&self, name: &str, max_guests: i32) -> VillaDetails {
        let category = self
            .services
            .catalog
            .create_category(&self.admin, &format!("{name} category"))
            .await
            .unwrap();
        let location = self
            .services
            .catalog
            .create_location(&self.admin, &format!("{name} area"))
            .await
            .unwrap();

        self.services
            .villas
            .create(&self.admin, new_villa(name, category.id, location.id, max_guests, vec![]))
            .await
            .unwrap()
    }
}

fn new_villa(
    name: &str,
    category_id: villabook_core::CategoryId,
    location_id: villabook_core::LocationId,
    max_guests: i32,
    amenity_ids: Vec<AmenityId>,
) -> NewVilla {
    NewVilla {
        name: name.to_string(),
        description: "Quiet villa surrounded by rice terraces".to_string(),
        category_id,
        location_id,
        max_guests,
        bedrooms: 2,
        baths: 2,
        nightly_price: 12_000,
        amenity_ids,
        image_keys: vec![],
    }
}

const PASSWORD: &str = "Tester_1234";

/// Log in, then resolve the issued claims the way a request would.
async fn sign_in(services: &Services, email: &str) -> Principal {
    let now = Utc::now();
    let claims = services.users.login(email, PASSWORD, now).await.unwrap();
    services.users.authenticate(&claims, now).await.unwrap()
}

fn claims(sub: villabook_core::UserId, role: RoleName) -> JwtClaims {
    let now = Utc::now();
    JwtClaims {
        sub,
        role,
        issued_at: now - Duration::minutes(1),
        expires_at: now + Duration::minutes(10),
    }
}

fn last_message(mailer: &ScriptedSender) -> SentMessage {
    mailer.sent().pop().expect("no message sent")
}

fn activation_token(message: &SentMessage) -> String {
    let url = message.vars["activationURL"].as_str().unwrap();
    url.rsplit("/confirm/").next().unwrap().to_string()
}

fn stay(start: &str, end: &str) -> StayRange {
    StayRange::parse(start, end).unwrap()
}

fn booking_request(villa: &VillaDetails, stay: StayRange, guests: i32) -> NewBooking {
    NewBooking {
        villa_id: villa.villa.id,
        stay,
        guest: GuestDetails {
            first_name: "Komang".to_string(),
            last_name: "Ayu".to_string(),
            email: "komang@example.com".to_string(),
        },
        guests,
    }
}

#[tokio::test]
async fn villa_with_unknown_amenity_is_rejected_and_leaves_nothing_behind() {
    let app = TestApp::spawn().await;
    let admin = &app.admin;
    let catalog = &app.services.catalog;

    let category = catalog.create_category(admin, "Cliffside").await.unwrap();
    let location = catalog.create_location(admin, "Uluwatu").await.unwrap();
    let kind = catalog.create_amenity_type(admin, "Outdoor").await.unwrap();
    let pool = catalog
        .create_amenity(admin, NewAmenity { name: "Infinity pool".to_string(), type_id: kind.id })
        .await
        .unwrap();

    let image = app
        .services
        .villas
        .upload_image(admin, "front.jpg", b"jpeg")
        .await
        .unwrap();

    let mut request = new_villa("Villa Tebing", category.id, location.id, 4, vec![pool.id, AmenityId::new()]);
    request.image_keys = vec![image];

    let err = app.services.villas.create(admin, request).await.unwrap_err();
    assert!(matches!(err, ServiceError::ReferenceNotFound(_)), "{err:?}");

    let villas = app.services.villas.list(&VillaQuery::default()).await.unwrap();
    assert!(villas.is_empty());
    assert!(app.images.is_empty());
}

#[tokio::test]
async fn villa_with_known_amenities_resolves_references() {
    let app = TestApp::spawn().await;
    let admin = &app.admin;
    let catalog = &app.services.catalog;

    let category = catalog.create_category(admin, "Jungle").await.unwrap();
    let location = catalog.create_location(admin, "Ubud").await.unwrap();
    let kind = catalog.create_amenity_type(admin, "Wellness").await.unwrap();
    let spa = catalog
        .create_amenity(admin, NewAmenity { name: "Spa".to_string(), type_id: kind.id })
        .await
        .unwrap();
    let yoga = catalog
        .create_amenity(admin, NewAmenity { name: "Yoga deck".to_string(), type_id: kind.id })
        .await
        .unwrap();

    let villa = app
        .services
        .villas
        .create(admin, new_villa("Villa Hutan", category.id, location.id, 6, vec![spa.id, yoga.id]))
        .await
        .unwrap();

    assert_eq!(villa.category.as_ref().map(|c| c.name.as_str()), Some("Jungle"));
    assert_eq!(villa.location.as_ref().map(|l| l.area.as_str()), Some("Ubud"));
    assert_eq!(villa.amenities.len(), 2);
    assert!(villa.amenities.iter().all(|a| a.type_name.as_deref() == Some("Wellness")));

    let err = catalog.delete_category(admin, category.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }));
}

#[tokio::test]
async fn overlapping_stay_conflicts_and_adjacent_stay_is_admitted() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Pantai", 4).await;
    let guest = app.sign_up("ketut").await;
    let bookings = &app.services.bookings;

    let first = bookings
        .create(&guest, booking_request(&villa, stay("2025-06-01", "2025-06-05"), 2))
        .await
        .unwrap();
    assert_eq!(first.status, BookingStatus::Open);
    assert_eq!(first.total_price, 4 * 12_000);
    assert_eq!(first.villa_name, "Villa Pantai");

    let err = bookings
        .create(&guest, booking_request(&villa, stay("2025-06-04", "2025-06-06"), 2))
        .await
        .unwrap_err();
    match err {
        ServiceError::Conflict { conflicting: Some(id), .. } if id == first.id => {}
        other => panic!("unexpected {other:?}"),
    }

    bookings
        .create(&guest, booking_request(&villa, stay("2025-06-05", "2025-06-07"), 2))
        .await
        .unwrap();
}

#[tokio::test]
async fn availability_reports_the_blocking_booking() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Sawah", 4).await;
    let guest = app.sign_up("nyoman").await;
    let bookings = &app.services.bookings;

    let wanted = stay("2025-09-10", "2025-09-12");
    assert!(bookings.check_availability(villa.villa.id, &wanted).await.unwrap().is_available());

    let booked = bookings.create(&guest, booking_request(&villa, wanted, 1)).await.unwrap();
    let answer = bookings
        .check_availability(villa.villa.id, &stay("2025-09-11", "2025-09-15"))
        .await
        .unwrap();
    assert_eq!(answer, villabook_bookings::Availability::Conflict { booking_id: booked.id });
}

#[tokio::test]
async fn check_in_twice_is_an_invalid_transition() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Bukit", 4).await;
    let guest = app.sign_up("wayan").await;
    let bookings = &app.services.bookings;

    let booking = bookings
        .create(&guest, booking_request(&villa, stay("2025-07-01", "2025-07-03"), 2))
        .await
        .unwrap();

    let err = bookings.check_out(&guest, booking.id, "complete").await.unwrap_err();
    assert_eq!(err, ServiceError::InvalidTransition("must check in first".to_string()));

    let checked_in = bookings.check_in(&guest, booking.id, "check_in").await.unwrap();
    assert_eq!(checked_in.status, BookingStatus::CheckedIn);

    let err = bookings.check_in(&guest, booking.id, "check_in").await.unwrap_err();
    assert_eq!(err, ServiceError::InvalidTransition("already checked in".to_string()));

    let err = bookings.check_out(&guest, booking.id, "check_out").await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("complete")));

    let done = bookings.check_out(&app.admin, booking.id, "complete").await.unwrap();
    assert_eq!(done.status, BookingStatus::Completed);

    let err = bookings.check_in(&guest, booking.id, "check_in").await.unwrap_err();
    assert_eq!(err, ServiceError::InvalidTransition("cannot check in after check out".to_string()));

    let stored = bookings.get(&guest, booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Completed);
}

#[tokio::test]
async fn owner_override_never_covers_delete() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Teratai", 4).await;
    let owner = app.sign_up("made").await;
    let stranger = app.sign_up("putu").await;
    let bookings = &app.services.bookings;

    let booking = bookings
        .create(&owner, booking_request(&villa, stay("2025-08-01", "2025-08-04"), 3))
        .await
        .unwrap();

    assert_eq!(bookings.get(&owner, booking.id).await.unwrap().id, booking.id);
    assert!(matches!(
        bookings.get(&stranger, booking.id).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        bookings.check_in(&stranger, booking.id, "check_in").await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        bookings.delete(&owner, booking.id).await,
        Err(ServiceError::Forbidden(_))
    ));

    bookings.delete(&app.admin, booking.id).await.unwrap();
    assert_eq!(bookings.get(&app.admin, booking.id).await.unwrap_err(), ServiceError::NotFound);
}

#[tokio::test]
async fn listings_respect_roles() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Lontar", 4).await;
    let alice = app.sign_up("alice").await;
    let bob = app.sign_up("bob").await;
    let bookings = &app.services.bookings;

    bookings
        .create(&alice, booking_request(&villa, stay("2025-10-01", "2025-10-03"), 1))
        .await
        .unwrap();
    bookings
        .create(&bob, booking_request(&villa, stay("2025-10-03", "2025-10-05"), 1))
        .await
        .unwrap();

    let mine = bookings.list_own(&alice, Page::default()).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].user_id, alice.id);

    assert!(matches!(
        bookings.list(&alice, Page::default()).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert_eq!(bookings.list(&app.admin, Page::default()).await.unwrap().len(), 2);
    assert_eq!(bookings.list(&app.admin, Page::new(1, 1)).await.unwrap().len(), 1);

    let fields = bookings
        .get_fields(&alice, mine[0].id, &[BookingField::Status, BookingField::TotalPrice])
        .await
        .unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["status"], "open");
}

#[tokio::test]
async fn guests_above_capacity_are_rejected() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Kecil", 2).await;
    let guest = app.sign_up("gede").await;

    let err = app
        .services
        .bookings
        .create(&guest, booking_request(&villa, stay("2025-11-01", "2025-11-02"), 3))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)), "{err:?}");
}

#[tokio::test]
async fn booking_an_unknown_villa_is_a_missing_reference() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Hilang", 2).await;
    let guest = app.sign_up("agung").await;

    let mut request = booking_request(&villa, stay("2025-11-01", "2025-11-02"), 1);
    request.villa_id = villabook_core::VillaId::new();

    let err = app.services.bookings.create(&guest, request).await.unwrap_err();
    assert!(matches!(err, ServiceError::ReferenceNotFound(_)));
}

#[tokio::test]
async fn failed_invitation_removes_the_principal() {
    let app = TestApp::spawn().await;
    let users = &app.services.users;

    app.mailer
        .fail_with(Some(MailError::Transport("provider unreachable".to_string())));
    let err = users.register("dewi", "dewi@example.com", PASSWORD).await.unwrap_err();
    assert_eq!(err, ServiceError::NotificationFailed { compensated: true });

    // The username is free again, so the compensation really removed the row.
    app.mailer.fail_with(None);
    users.register("dewi", "dewi@example.com", PASSWORD).await.unwrap();

    let sent = last_message(&app.mailer);
    assert_eq!(sent.template, "user_invitation");
    assert_eq!(sent.recipient_address, "dewi@example.com");
    assert!(sent.sandbox);
    assert!(sent.vars["activationURL"].as_str().unwrap().starts_with("http://client.test/confirm/"));
}

#[tokio::test]
async fn invitation_token_is_single_use() {
    let app = TestApp::spawn().await;
    let users = &app.services.users;

    let id = users.register("sari", "sari@example.com", PASSWORD).await.unwrap();
    let token = activation_token(&last_message(&app.mailer));

    assert_eq!(users.activate(&token).await.unwrap(), id);
    assert_eq!(users.activate(&token).await.unwrap_err(), ServiceError::NotFound);
    assert!(matches!(users.activate("  ").await, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn inactive_principal_cannot_act() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Sepi", 2).await;
    let id = app.services.users.register("lina", "lina@example.com", PASSWORD).await.unwrap();

    let err = app
        .services
        .users
        .authenticate(&claims(id, RoleName::USER), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let inactive = villabook_infra::UserStore::get(app.store.as_ref(), id)
        .await
        .unwrap()
        .unwrap();
    let err = app
        .services
        .bookings
        .create(&inactive, booking_request(&villa, stay("2025-12-01", "2025-12-02"), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
}

#[tokio::test]
async fn expired_claims_are_unauthorized() {
    let app = TestApp::spawn().await;
    let mut stale = claims(app.admin.id, RoleName::ADMIN);
    stale.expires_at = Utc::now() - Duration::seconds(1);

    let err = app.services.users.authenticate(&stale, Utc::now()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
}

#[tokio::test]
async fn admin_cannot_hand_out_a_higher_role() {
    let app = TestApp::spawn().await;
    let owner = Role::new(RoleName::new("owner"), RoleLevel::new(6), "Villa owner");
    RoleStore::ensure(app.store.as_ref(), &owner).await.unwrap();
    let users = &app.services.users;

    let err = users
        .create_user(&app.admin, "boss", "boss@example.com", PASSWORD, RoleName::new("owner"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = users
        .create_user(&app.admin, "ghost", "ghost@example.com", PASSWORD, RoleName::new("superuser"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ReferenceNotFound(_)));

    let grant = app
        .services
        .access
        .require(&app.admin, &RoleName::new("superuser"))
        .await;
    assert!(matches!(grant, Err(ServiceError::Forbidden(_))));
    assert_eq!(
        app.services.access.require(&app.admin, &RoleName::ADMIN).await.unwrap(),
        AccessGrant::Precedence
    );

    let staff = users
        .create_user(&app.admin, "staff", "staff@example.com", PASSWORD, RoleName::USER)
        .await
        .unwrap();
    assert!(users.delete_user(&app.admin, staff).await.unwrap());
    assert!(!users.delete_user(&app.admin, staff).await.unwrap());
}

#[tokio::test]
async fn villa_patch_and_filters() {
    let app = TestApp::spawn().await;
    let small = app.villa("Villa Mungil", 2).await;
    let large = app.villa("Villa Besar", 8).await;
    let villas = &app.services.villas;

    let err = villas.update(&app.admin, small.villa.id, VillaPatch::default()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let patched = villas
        .update(
            &app.admin,
            small.villa.id,
            VillaPatch {
                max_guests: Some(3),
                nightly_price: Some(9_000),
                ..VillaPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(patched.villa.max_guests, 3);
    assert_eq!(patched.villa.nightly_price, 9_000);
    assert_eq!(patched.villa.name, "Villa Mungil");

    let roomy = villas
        .list(&VillaQuery {
            min_guests: Some(5),
            ..VillaQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(roomy.len(), 1);
    assert_eq!(roomy[0].villa.id, large.villa.id);

    let oldest_first: Vec<_> = villas
        .list(&VillaQuery::default())
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.villa.id)
        .collect();
    let mut newest_first: Vec<_> = villas
        .list(&VillaQuery {
            descending: true,
            ..VillaQuery::default()
        })
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.villa.id)
        .collect();
    newest_first.reverse();
    assert_eq!(newest_first, oldest_first);
}

#[tokio::test]
async fn villa_with_bookings_cannot_be_deleted() {
    let app = TestApp::spawn().await;
    let booked = app.villa("Villa Ramai", 4).await;
    let empty = app.villa("Villa Kosong", 4).await;
    let guest = app.sign_up("rai").await;

    app.services
        .bookings
        .create(&guest, booking_request(&booked, stay("2025-06-01", "2025-06-02"), 1))
        .await
        .unwrap();

    let err = app.services.villas.delete(&app.admin, booked.villa.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }));

    assert!(matches!(
        app.services.villas.delete(&guest, empty.villa.id).await,
        Err(ServiceError::Forbidden(_))
    ));
    app.services.villas.delete(&app.admin, empty.villa.id).await.unwrap();
    assert_eq!(app.services.villas.get(empty.villa.id).await.unwrap_err(), ServiceError::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_requests_admit_exactly_one() {
    let app = TestApp::spawn().await;
    let villa = app.villa("Villa Rebutan", 4).await;
    let guest = app.sign_up("komang").await;

    let mut handles = Vec::new();
    for extra in 0..8 {
        let services = app.services.clone();
        let guest = guest.clone();
        let end = format!("2025-06-{:02}", 12 + extra);
        let request = booking_request(&villa, stay("2025-06-10", &end), 1);
        handles.push(tokio::spawn(async move {
            services.bookings.create(&guest, request).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(ServiceError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn login_claims_authenticate_until_they_expire() {
    let app = TestApp::spawn().await;
    let guest = app.sign_up("gede").await;
    let users = &app.services.users;

    let now = Utc::now();
    let claims = users.login(" gede@example.com ", PASSWORD, now).await.unwrap();
    assert_eq!(claims.sub, guest.id);
    assert_eq!(claims.role, RoleName::USER);
    assert_eq!(claims.expires_at - claims.issued_at, Duration::hours(2));

    assert_eq!(users.authenticate(&claims, now).await.unwrap().id, guest.id);
    let err = users.authenticate(&claims, now + Duration::hours(2)).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_inactive_principals() {
    let app = TestApp::spawn().await;
    app.sign_up("putu").await;
    app.services.users.register("ketut", "ketut@example.com", PASSWORD).await.unwrap();
    let users = &app.services.users;
    let now = Utc::now();

    for (email, password) in [
        ("putu@example.com", "Wrong_1234"),
        ("nobody@example.com", PASSWORD),
        ("ketut@example.com", PASSWORD),
    ] {
        match users.login(email, password, now).await {
            Err(ServiceError::Unauthorized(_)) => {}
            other => panic!("{email}: unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn weak_password_is_rejected_before_anything_is_stored() {
    let app = TestApp::spawn().await;
    let users = &app.services.users;
    let sent = app.mailer.sent().len();

    for weak in ["short", "nouppercase_1", "NoDigits_here", "NoSymbol1234", "Has Space_1"] {
        let err = users.register("wira", "wira@example.com", weak).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)), "{weak}: {err:?}");
    }
    assert_eq!(app.mailer.sent().len(), sent);

    users.register("wira", "wira@example.com", PASSWORD).await.unwrap();
}

#[tokio::test]
async fn forbidden_villa_create_leaves_uploaded_images_alone() {
    let app = TestApp::spawn().await;
    let mallory = app.sign_up("mallory").await;
    let category = app.services.catalog.create_category(&app.admin, "Jungle").await.unwrap();
    let location = app.services.catalog.create_location(&app.admin, "Ubud").await.unwrap();
    let image = app
        .services
        .villas
        .upload_image(&app.admin, "deck.jpg", b"jpeg")
        .await
        .unwrap();

    let mut request = new_villa("Villa Rimba", category.id, location.id, 4, vec![]);
    request.image_keys = vec![image];

    let err = app.services.villas.create(&mallory, request).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)), "{err:?}");
    assert_eq!(app.images.len(), 1);
}

#[tokio::test]
async fn failed_create_keeps_images_another_villa_holds() {
    let app = TestApp::spawn().await;
    let admin = &app.admin;
    let category = app.services.catalog.create_category(admin, "Lakeside").await.unwrap();
    let location = app.services.catalog.create_location(admin, "Bedugul").await.unwrap();
    let image = app.services.villas.upload_image(admin, "lake.jpg", b"jpeg").await.unwrap();

    let mut first = new_villa("Villa Danau", category.id, location.id, 4, vec![]);
    first.image_keys = vec![image.clone()];
    app.services.villas.create(admin, first).await.unwrap();

    // A retry that reuses the stored villa's image must not delete it.
    let mut retry = new_villa("Villa Danau", category.id, location.id, 4, vec![]);
    retry.image_keys = vec![image.clone()];
    let err = app.services.villas.create(admin, retry).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }), "{err:?}");
    assert_eq!(app.images.len(), 1);

    let villas = app.services.villas.list(&VillaQuery::default()).await.unwrap();
    assert_eq!(villas.len(), 1);
    assert_eq!(villas[0].villa.image_keys, vec![image]);
}

#[tokio::test]
async fn villa_images_must_have_been_uploaded() {
    let app = TestApp::spawn().await;
    let admin = &app.admin;
    let category = app.services.catalog.create_category(admin, "Hillside").await.unwrap();
    let location = app.services.catalog.create_location(admin, "Munduk").await.unwrap();

    let mut request = new_villa("Villa Bukit", category.id, location.id, 4, vec![]);
    request.image_keys = vec!["never-uploaded.jpg".to_string()];

    let err = app.services.villas.create(admin, request).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)), "{err:?}");
    assert!(app.services.villas.list(&VillaQuery::default()).await.unwrap().is_empty());
}
