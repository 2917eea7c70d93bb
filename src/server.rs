//! # Server Configuration
//!
//! Shared application state, the router, and the serve loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{UserIdentity, cron_auth_middleware, user_auth_middleware};
use crate::config::AppConfig;
use crate::connectors::{
    CalendarClient, EmbeddingProvider, GmailClient, GoogleTokenClient, HubSpotClient, N8nClient,
    OpenAiEmbedder, PeriskopeClient, SlackClient,
};
use crate::crypto::CryptoKey;
use crate::embedding_executor::EmbeddingExecutor;
use crate::error::ApiError;
use crate::handlers;
use crate::models::user;
use crate::partner_billing::{MongoLedger, PartnerLedger};
use crate::repositories::{
    CalendarEventRepository, CrmRepository, EmailRepository, EmbeddingQueueRepository,
    HandbookRepository, IntegrationRepository, MessageRepository, SyncRunRepository,
    UserRepository,
};
use crate::scheduler::SyncScheduler;
use crate::sync::calendar::CalendarSync;
use crate::sync::gmail::GmailSync;
use crate::sync::hubspot::HubSpotSync;
use crate::sync::orchestrator::IncrementalOrchestrator;
use crate::sync::periskope::PeriskopeImport;
use crate::sync::slack::SlackImport;
use crate::telemetry::trace_context_middleware;
use crate::token_refresh::TokenRefresher;
use crate::webhook_verification::slack_verification_middleware;

/// Upstream clients built once from configuration
#[derive(Clone)]
pub struct ProviderClients {
    pub google_auth: GoogleTokenClient,
    pub gmail: GmailClient,
    pub calendar: CalendarClient,
    pub hubspot: HubSpotClient,
    pub periskope: PeriskopeClient,
    pub slack: SlackClient,
    pub n8n: N8nClient,
}

impl ProviderClients {
    pub fn from_config(config: &AppConfig) -> Self {
        let p = &config.providers;
        Self {
            google_auth: GoogleTokenClient::new(
                p.google_token_url.clone(),
                p.google_client_id.clone(),
                p.google_client_secret.clone(),
            ),
            gmail: GmailClient::new(p.gmail_api_base.clone()),
            calendar: CalendarClient::new(p.calendar_api_base.clone()),
            hubspot: HubSpotClient::new(p.hubspot_api_base.clone(), p.hubspot_access_token.clone()),
            periskope: PeriskopeClient::new(p.periskope_api_base.clone()),
            slack: SlackClient::new(p.slack_api_base.clone(), p.slack_bot_token.clone()),
            n8n: N8nClient::new(p.n8n_webhook_url.clone()),
        }
    }
}

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
    pub clients: ProviderClients,
    pub ledger: Arc<dyn PartnerLedger>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        let p = &config.providers;
        let ledger: Arc<dyn PartnerLedger> = Arc::new(MongoLedger::new(
            p.mongodb_uri.clone(),
            p.mongodb_database.clone(),
        ));
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedder::new(
            p.openai_api_base.clone(),
            p.openai_api_key.clone(),
            p.embedding_model.clone(),
        ));
        Self {
            clients: ProviderClients::from_config(&config),
            config,
            db,
            crypto_key,
            ledger,
            embedder,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn PartnerLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.db.clone())
    }

    pub fn integrations(&self) -> IntegrationRepository {
        IntegrationRepository::new(self.db.clone(), self.crypto_key.clone())
    }

    pub fn crm(&self) -> CrmRepository {
        CrmRepository::new(self.db.clone())
    }

    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(self.db.clone())
    }

    pub fn handbooks(&self) -> HandbookRepository {
        HandbookRepository::new(self.db.clone())
    }

    pub fn sync_runs(&self) -> SyncRunRepository {
        SyncRunRepository::new(self.db.clone())
    }

    fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.config.sync.chunk_delay_ms)
    }

    /// Local user row for the caller, created on first sight.
    pub async fn resolve_user(&self, identity: &UserIdentity) -> Result<user::Model, ApiError> {
        Ok(self.users().get_or_create(&identity.0).await?)
    }

    pub fn token_refresher(&self) -> TokenRefresher {
        TokenRefresher::new(self.integrations(), self.clients.google_auth.clone())
    }

    pub fn gmail_sync(&self) -> GmailSync {
        GmailSync::new(
            self.clients.gmail.clone(),
            EmailRepository::new(self.db.clone()),
            self.integrations(),
            self.sync_runs(),
            EmbeddingQueueRepository::new(self.db.clone()),
            self.config.sync.clone(),
        )
    }

    pub fn calendar_sync(&self) -> CalendarSync {
        CalendarSync::new(
            self.clients.calendar.clone(),
            CalendarEventRepository::new(self.db.clone()),
            self.integrations(),
            self.sync_runs(),
            EmbeddingQueueRepository::new(self.db.clone()),
            self.config.sync.clone(),
        )
    }

    pub fn hubspot_sync(&self) -> HubSpotSync {
        HubSpotSync::new(
            self.clients.hubspot.clone(),
            self.crm(),
            self.sync_runs(),
            self.chunk_delay(),
        )
    }

    pub fn periskope_import(&self) -> PeriskopeImport {
        PeriskopeImport::new(
            self.clients.periskope.clone(),
            self.messages(),
            self.sync_runs(),
            self.config.sync.clone(),
        )
    }

    pub fn slack_import(&self) -> SlackImport {
        SlackImport::new(
            self.clients.slack.clone(),
            self.messages(),
            self.sync_runs(),
            self.config.sync.clone(),
        )
    }

    pub fn embedding_executor(&self) -> EmbeddingExecutor {
        EmbeddingExecutor::new(
            EmbeddingQueueRepository::new(self.db.clone()),
            EmailRepository::new(self.db.clone()),
            CalendarEventRepository::new(self.db.clone()),
            self.embedder.clone(),
            Duration::from_millis(self.config.embedding.item_delay_ms),
        )
    }

    pub fn orchestrator(&self) -> IncrementalOrchestrator {
        IncrementalOrchestrator::new(
            self.integrations(),
            self.token_refresher(),
            self.gmail_sync(),
            self.calendar_sync(),
            Duration::from_millis(self.config.sync.user_delay_ms),
        )
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let user_routes = Router::new()
        .route(
            "/api/hubspot/sync",
            post(handlers::hubspot::sync_hubspot).get(handlers::hubspot::hubspot_counts),
        )
        .route(
            "/api/hubspot/link-associations",
            post(handlers::hubspot::link_associations),
        )
        .route(
            "/api/hubspot/deals/{hubspot_deal_id}/engagements",
            post(handlers::hubspot::sync_deal_engagements),
        )
        .route(
            "/api/nuclear-gmail-sync",
            post(handlers::nuclear::nuclear_gmail_sync),
        )
        .route(
            "/api/nuclear-calendar-sync",
            post(handlers::nuclear::nuclear_calendar_sync),
        )
        .route(
            "/api/periskope/import-messages",
            post(handlers::periskope::import_messages),
        )
        .route("/api/slack/import", post(handlers::slack::import_channel))
        .route("/api/slack/messages", post(handlers::slack::post_message))
        .route(
            "/api/fc-summary/{partner_org_id}",
            get(handlers::fc_summary::get_fc_summary),
        )
        .route("/api/send-webhook", post(handlers::notify::send_webhook))
        .route(
            "/api/solution-handbooks",
            get(handlers::handbooks::list_handbooks),
        )
        .route(
            "/api/solution-handbooks/{id}",
            get(handlers::handbooks::get_handbook),
        )
        .route(
            "/api/integrations",
            get(handlers::integrations::list_integrations),
        )
        .route(
            "/api/integrations/{platform}",
            put(handlers::integrations::upsert_integration),
        )
        .route("/api/sync-runs", get(handlers::sync_runs::list_sync_runs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            user_auth_middleware,
        ));

    let cron_routes = Router::new()
        .route(
            "/api/cron/process-embeddings",
            post(handlers::cron::process_embeddings).get(handlers::cron::embedding_stats),
        )
        .route("/api/cron/cleanup-queue", post(handlers::cron::cleanup_queue))
        .route(
            "/api/cron/sync-incremental",
            post(handlers::cron::sync_incremental),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            cron_auth_middleware,
        ));

    let webhook_routes = Router::new()
        .route("/api/webhooks/slack", post(handlers::slack::slack_events))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            slack_verification_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(user_routes)
        .merge(cron_routes)
        .merge(webhook_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Starts the server (and the scheduler when enabled) and serves until Ctrl-C.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let crypto_key = config
        .crypto_key
        .clone()
        .ok_or_else(|| anyhow!("CRMSYNC_CRYPTO_KEY must be set"))
        .and_then(|bytes| CryptoKey::new(bytes).context("Invalid crypto key"))?;
    let addr = config.bind_addr().context("Invalid server address")?;

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), Arc::new(db), crypto_key);

    let shutdown = CancellationToken::new();
    let scheduler = if config.scheduler.enabled {
        let scheduler = SyncScheduler::new(state.clone());
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        None
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::hubspot::sync_hubspot,
        crate::handlers::hubspot::hubspot_counts,
        crate::handlers::hubspot::link_associations,
        crate::handlers::hubspot::sync_deal_engagements,
        crate::handlers::nuclear::nuclear_gmail_sync,
        crate::handlers::nuclear::nuclear_calendar_sync,
        crate::handlers::periskope::import_messages,
        crate::handlers::slack::import_channel,
        crate::handlers::slack::post_message,
        crate::handlers::slack::slack_events,
        crate::handlers::fc_summary::get_fc_summary,
        crate::handlers::notify::send_webhook,
        crate::handlers::handbooks::list_handbooks,
        crate::handlers::handbooks::get_handbook,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::upsert_integration,
        crate::handlers::sync_runs::list_sync_runs,
        crate::handlers::cron::process_embeddings,
        crate::handlers::cron::embedding_stats,
        crate::handlers::cron::cleanup_queue,
        crate::handlers::cron::sync_incremental,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::sync::SyncOutcome,
            crate::sync::hubspot::HubSpotSyncRequest,
            crate::sync::hubspot::HubSpotSyncStats,
            crate::sync::hubspot::EngagementSyncResult,
            crate::sync::associations::LinkStats,
            crate::repositories::crm::CrmCounts,
            crate::handlers::nuclear::NuclearSyncRequest,
            crate::sync::gmail::GmailSyncReport,
            crate::sync::calendar::CalendarSyncReport,
            crate::sync::calendar::CalendarResult,
            crate::handlers::periskope::ImportMessagesRequest,
            crate::sync::periskope::ImportResult,
            crate::handlers::slack::ImportChannelRequest,
            crate::handlers::slack::PostMessageRequest,
            crate::handlers::slack::PostMessageResponse,
            crate::partner_billing::FcSummary,
            crate::handlers::notify::WebhookForwarded,
            crate::handlers::handbooks::HandbookInfo,
            crate::handlers::integrations::IntegrationInfo,
            crate::handlers::integrations::UpsertIntegrationRequest,
            crate::handlers::sync_runs::SyncRunInfo,
            crate::handlers::sync_runs::SyncRunsResponse,
            crate::embedding_executor::BatchResult,
            crate::embedding_executor::CleanupResult,
            crate::repositories::embedding_queue::QueueStats,
            crate::sync::orchestrator::OrchestratorReport,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service info and health"),
        (name = "hubspot", description = "HubSpot CRM sync"),
        (name = "google", description = "Gmail and Calendar full resync"),
        (name = "messaging", description = "WhatsApp and Slack"),
        (name = "billing", description = "Flight-credit summaries"),
        (name = "integrations", description = "User integrations and sync runs"),
        (name = "cron", description = "Scheduled maintenance endpoints"),
    ),
    info(
        title = "CRM Sync API",
        description = "Multi-tenant CRM sync service",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
