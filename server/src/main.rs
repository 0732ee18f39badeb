// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use glkdc_backend::external::fakes::{AlwaysMutual, InMemoryAccountKeyProvider};
use glkdc_backend::fault_injector::NoopFaultInjector;
use glkdc_backend::group_controller::GroupController;
use glkdc_backend::infra_service::InfraService;
use glkdc_backend::key_epoch_coordinator::KeyEpochCoordinator;
use glkdc_backend::keys::cache::KeyCache;
use glkdc_backend::keys::postgres::PgKeyVersionStore;
use glkdc_backend::keys::KeyVersionStore;
use glkdc_backend::membership::postgres::PgMembershipStore;
use glkdc_backend::membership::MembershipStore;
use glkdc_backend::membership_fsm::MembershipFsm;
use glkdc_backend::pubsub::memory::InMemoryPubSubBus;
use glkdc_backend::pubsub::PubSubBus;
use glkdc_backend::rate_limiter::registry::LimiterRegistry;
use glkdc_server::auth::fakes::HeaderTrustingCaller;
use glkdc_server::auth::AuthenticatedCaller;
use glkdc_server::configurations::get_configuration;
use glkdc_server::telemetry::{get_subscriber, init_subscriber};
use tracing::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let subscriber = get_subscriber("glkdc-server".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let configuration = get_configuration("server/").expect("failed to load configuration");

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address).expect("failed to bind to the configured port");
    info!(%address, "binding listener");

    let membership: Arc<dyn MembershipStore> =
        Arc::new(connect_with_retries::<PgMembershipStore>(&configuration.database).await);
    let keys: Arc<dyn KeyVersionStore> =
        Arc::new(connect_with_retries::<PgKeyVersionStore>(&configuration.database).await);

    let pubsub: Arc<dyn PubSubBus> = Arc::new(InMemoryPubSubBus::new());
    // Account service and contact-mutuality checks live outside this crate;
    // these stand-ins are wired directly into production rather than hidden
    // behind test-only compilation.
    let account_keys: Arc<dyn glkdc_backend::external::AccountKeyProvider> =
        Arc::new(InMemoryAccountKeyProvider::default());
    let mutuality: Arc<dyn glkdc_backend::external::ContactMutualityChecker> = Arc::new(AlwaysMutual);
    let authenticator: Arc<dyn AuthenticatedCaller> = Arc::new(HeaderTrustingCaller);

    let limiters = Arc::new(LimiterRegistry::new(
        pg_pool(&configuration.database).await,
        &configuration.rate_limits,
    ));
    let cache = KeyCache::new(configuration.group.key_cache_ttl());

    let key_epoch = Arc::new(KeyEpochCoordinator::new(
        membership.clone(),
        keys.clone(),
        cache,
        pubsub.clone(),
        account_keys.clone(),
        configuration.group.clone(),
        Arc::new(NoopFaultInjector),
    ));

    let fsm = Arc::new(MembershipFsm::new(
        membership.clone(),
        keys,
        pubsub,
        key_epoch.clone(),
        limiters.clone(),
        account_keys.clone(),
        mutuality,
        configuration.group.clone(),
    ));

    let controller = Arc::new(GroupController::new(
        membership,
        account_keys,
        limiters,
        fsm,
        key_epoch,
        configuration.group,
    ));

    glkdc_server::run(
        listener,
        controller,
        authenticator,
        Duration::from_secs(configuration.application.request_deadline_seconds),
        configuration.application.max_body_bytes,
    )?
    .await
}

/// Connects and migrates, retrying for up to ten seconds in case Postgres is
/// still coming up.
async fn connect_with_retries<S: InfraService>(
    database_settings: &glkdc_backend::settings::DatabaseSettings,
) -> S {
    let mut attempt = 0;
    loop {
        match S::new(database_settings).await {
            Ok(service) => return service,
            Err(e) => {
                info!("failed to connect to postgres: {e}");
                attempt += 1;
                if attempt > 10 {
                    panic!("database not ready after 10 seconds");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn pg_pool(database_settings: &glkdc_backend::settings::DatabaseSettings) -> sqlx::PgPool {
    sqlx::PgPool::connect(&database_settings.connection_string())
        .await
        .expect("failed to connect to postgres")
}
