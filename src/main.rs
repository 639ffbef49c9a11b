use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_subject_enrichment::config::Config;
use rust_subject_enrichment::db::Database;
use rust_subject_enrichment::db_storage::PgEnrichmentStore;
use rust_subject_enrichment::handlers::{self, AppState};
use rust_subject_enrichment::orchestrator::Orchestrator;
use rust_subject_enrichment::registry::AdapterRegistry;
use rust_subject_enrichment::store::EnrichmentStore;

/// Starts the enrichment service: tracing, configuration, database and
/// migrations, the adapter registry, and the HTTP routes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_subject_enrichment=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DB_URL or DATABASE_URL must be set"))?;
    let db = Database::new(&database_url).await?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn EnrichmentStore> = Arc::new(
        PgEnrichmentStore::new(db.pool.clone()).with_stale_after(config.single_flight_ttl()),
    );

    let registry = Arc::new(AdapterRegistry::from_config(&config)?);
    let orchestrator = Orchestrator::from_config(&config, registry, store.clone());
    tracing::info!(
        "Orchestrator ready (worker pool {}, pass deadline {:?})",
        config.worker_pool_size,
        orchestrator.pass_deadline()
    );

    let app_state = Arc::new(AppState {
        orchestrator,
        store,
    });

    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route(
            "/api/v1/subjects/:subject_id/enrich",
            post(handlers::trigger_enrichment),
        )
        .route(
            "/api/v1/subjects/:subject_id/profile",
            get(handlers::get_profile),
        )
        .route("/api/v1/subjects/:subject_id/risk", get(handlers::get_risk))
        .route(
            "/api/v1/subjects/:subject_id/lookups",
            get(handlers::get_lookups),
        )
        .layer(
            ServiceBuilder::new()
                // 64KB is plenty for an identity record
                .layer(RequestBodyLimitLayer::new(64 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
