//! Infrastructure layer: persistence gateway, composite writes, notifications,
//! image storage and configuration.

pub mod availability;
pub mod config;
pub mod db;
pub mod images;
pub mod mailer;
pub mod saga;
pub mod schema;
pub mod store;

pub use availability::AvailabilityChecker;
pub use config::{AppConfig, AppEnv, ConfigError, DatabaseConfig, MailConfig};
pub use db::{connect, with_timeout};
pub use images::{ImageStore, ImageStoreError, InMemoryImageStore, LocalImageStore};
pub use mailer::{LogSender, MailError, NotificationSender, ScriptedSender, SendGridSender, SentMessage};
pub use saga::{SagaError, create_with_dependents, create_with_notification};
pub use store::{
    BookingStore, CatalogStore, CompositeError, CompositeStore, InMemoryStore, Page, PostgresStore,
    RoleStore, StoreError, UserStore, VillaQuery, VillaStore,
};
