//! Service wiring.

use std::sync::Arc;

use chrono::Duration;

use villabook_core::ValidationRules;
use villabook_infra::images::ImageStore;
use villabook_infra::{
    AppConfig, BookingStore, CatalogStore, NotificationSender, RoleStore, UserStore, VillaStore,
};

use crate::access::AccessControl;
use crate::bookings::BookingService;
use crate::catalog::CatalogService;
use crate::users::{InvitationSettings, UserService};
use crate::villas::VillaService;

/// Collaborators the services are built from.
#[derive(Clone)]
pub struct Backends {
    pub bookings: Arc<dyn BookingStore>,
    pub villas: Arc<dyn VillaStore>,
    pub users: Arc<dyn UserStore>,
    pub roles: Arc<dyn RoleStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub images: Arc<dyn ImageStore>,
    pub mailer: Arc<dyn NotificationSender>,
}

impl Backends {
    /// Every store served by one gateway.
    pub fn shared<S>(store: Arc<S>, images: Arc<dyn ImageStore>, mailer: Arc<dyn NotificationSender>) -> Self
    where
        S: BookingStore + VillaStore + UserStore + RoleStore + CatalogStore + 'static,
    {
        Self {
            bookings: store.clone(),
            villas: store.clone(),
            users: store.clone(),
            roles: store.clone(),
            catalog: store,
            images,
            mailer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub rules: ValidationRules,
    pub invitations: InvitationSettings,
    /// Lifetime of the claims issued at sign-in.
    pub token_ttl: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            rules: ValidationRules::default(),
            invitations: InvitationSettings {
                client_url: config.client_url.clone(),
                ttl: config.invitation_ttl,
                template: config.mail.invitation_template.clone(),
                sandbox: config.env.sandbox_notifications(),
            },
            token_ttl: config.token_ttl,
        }
    }
}

/// The application services, sharing one access-control instance.
#[derive(Clone)]
pub struct Services {
    pub access: AccessControl,
    pub bookings: BookingService,
    pub villas: VillaService,
    pub users: UserService,
    pub catalog: CatalogService,
}

impl Services {
    pub fn new(backends: Backends, settings: ServiceSettings) -> Self {
        let access = AccessControl::new(backends.roles);
        let rules = settings.rules;

        Self {
            bookings: BookingService::new(
                backends.bookings,
                backends.villas.clone(),
                access.clone(),
                rules.clone(),
            ),
            villas: VillaService::new(backends.villas, backends.images, access.clone(), rules.clone()),
            users: UserService::new(
                backends.users,
                backends.mailer,
                access.clone(),
                rules.clone(),
                settings.invitations,
                settings.token_ttl,
            ),
            catalog: CatalogService::new(backends.catalog, access.clone(), rules),
            access,
        }
    }
}
