use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use villabook_infra::images::LocalImageStore;
use villabook_infra::{AppConfig, NotificationSender, PostgresStore, connect, mailer, schema};
use villabook_service::{Backends, ServiceError, ServiceSettings, Services};

/// Prepare the database: apply the schema, seed roles and optionally invite
/// the first administrator.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    villabook_observability::init(&config.log);

    let pool = connect(&config.database)
        .await
        .context("failed to connect to the database")?;
    schema::apply(&pool).await.context("failed to apply schema")?;

    let store = Arc::new(PostgresStore::new(pool, config.database.query_timeout));
    let seeded = schema::seed_roles(store.as_ref())
        .await
        .context("failed to seed roles")?;
    info!(seeded, "roles ready");

    let mailer: Arc<dyn NotificationSender> = Arc::from(mailer::from_config(&config.mail));
    let images = Arc::new(LocalImageStore::new(&config.upload_dir));
    let services = Services::new(
        Backends::shared(store, images, mailer),
        ServiceSettings::from_config(&config),
    );

    let username = std::env::var("BOOTSTRAP_ADMIN_USERNAME").ok();
    let email = std::env::var("BOOTSTRAP_ADMIN_EMAIL").ok();
    let password = std::env::var("BOOTSTRAP_ADMIN_PASSWORD").ok();
    match (username, email, password) {
        (Some(username), Some(email), Some(password)) => {
            match services.users.bootstrap_admin(&username, &email, &password).await {
                Ok(id) => info!(user_id = %id, "administrator invited"),
                Err(ServiceError::Conflict { .. }) => info!(%username, "administrator already exists"),
                Err(e) => return Err(e).context("failed to invite administrator"),
            }
        }
        _ => warn!(
            "BOOTSTRAP_ADMIN_USERNAME/BOOTSTRAP_ADMIN_EMAIL/BOOTSTRAP_ADMIN_PASSWORD not set; no administrator invited"
        ),
    }

    info!(env = ?config.env, "bootstrap complete");
    Ok(())
}
