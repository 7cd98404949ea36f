use std::sync::Arc;
use std::time::Duration;

use skillrelay_auth::InboundAuthenticator;
use skillrelay_core::audit::{AuditSink, TracingAuditSink};
use skillrelay_core::config::{AppConfig, ConfigError};
use skillrelay_core::{RegistryError, RoutingKeyError, RoutingKeyFactory, SkillRegistry};
use skillrelay_db::{
    connect_with_settings, migrations, DbPool, SqlCorrelationRepository,
    SqlRouterStateRepository,
};
use skillrelay_router::{
    ConnectorClient, ConversationCorrelator, ConversationLocks, DefaultRootHandler,
    KeywordRecognizer, ProactiveDeliverer, ProactiveQueue, RootMessages, RouterServices,
    RouterSettings, TurnRouter,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::ApiState;
use crate::clients::{http_client, HttpConnectorClient, HttpSkillClient};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub router: Arc<TurnRouter>,
    pub authenticator: InboundAuthenticator,
    pub connector: Arc<dyn ConnectorClient>,
    pub proactive: ProactiveQueue,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState {
            router: Arc::clone(&self.router),
            authenticator: self.authenticator.clone(),
            connector: Arc::clone(&self.connector),
            proactive: self.proactive.handle(),
            channel_service: self.config.auth.channel_service.clone(),
            skill_mode: self.config.router.skill_mode,
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("skill registry rejected: {0}")]
    Registry(#[from] RegistryError),
    #[error("correlation secret rejected: {0}")]
    CorrelationSecret(#[from] RoutingKeyError),
    #[error("http client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        skills = config.skills.len(),
        "starting application bootstrap"
    );

    let registry = Arc::new(SkillRegistry::from_config(&config.skills)?);
    let keys = match config.correlation.secret.as_ref() {
        Some(secret) => RoutingKeyFactory::new(secret)?,
        None => {
            warn!(
                event_name = "system.bootstrap.ephemeral_correlation_secret",
                correlation_id = "bootstrap",
                "correlation.secret is not set; routing keys will not survive a restart"
            );
            RoutingKeyFactory::ephemeral()
        }
    };

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let http = http_client(Duration::from_secs(config.router.skill_timeout_secs))
        .map_err(BootstrapError::HttpClient)?;
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let locks = Arc::new(ConversationLocks::new());
    let correlator = Arc::new(ConversationCorrelator::new(
        Arc::clone(&registry),
        keys,
        Arc::new(SqlCorrelationRepository::new(db_pool.clone())),
        Arc::clone(&audit),
    ));
    let connector: Arc<dyn ConnectorClient> = Arc::new(HttpConnectorClient::new(http.clone()));

    let services = RouterServices {
        registry,
        correlator: Arc::clone(&correlator),
        recognizer: Arc::new(KeywordRecognizer::from_config(&config)),
        skills: Arc::new(HttpSkillClient::new(http.clone(), config.server.public_url.clone())),
        root: Arc::new(DefaultRootHandler::new(RootMessages::default())),
        states: Arc::new(SqlRouterStateRepository::new(db_pool.clone())),
        locks: Arc::clone(&locks),
        audit: Arc::clone(&audit),
    };
    let router = Arc::new(TurnRouter::new(services, RouterSettings::from(&config.router)));

    let deliverer =
        Arc::new(ProactiveDeliverer::new(correlator, Arc::clone(&connector), locks, audit));
    let proactive = ProactiveQueue::start(
        deliverer,
        config.router.proactive_queue_capacity,
        config.router.proactive_workers,
    );

    let authenticator = InboundAuthenticator::from_config(&config.auth, http);
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        auth_enabled = authenticator.is_enabled(),
        skill_mode = config.router.skill_mode,
        "router services assembled"
    );

    Ok(Application { config, db_pool, router, authenticator, connector, proactive })
}
