//! YaMDb API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Caller authentication and permission checks
//! - Rate limiting of the auth endpoints
//! - Request routing
//! - Observability (logging, metrics)

mod extract;
mod handlers;
mod middleware;

use axum::{
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yamdb_common::{
    access::AdminPolicy,
    auth::{ConfirmationCodes, JwtManager},
    config::{AppConfig, ObservabilityConfig},
    db::{schema, DbPool, Repository},
    mail,
    metrics,
    outbox::Outbox,
    services::{AccountService, CatalogService, ReviewService},
};

/// Application state shared across handlers
#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub jwt: Arc<JwtManager>,
    pub accounts: AccountService,
    pub catalog: CatalogService,
    pub reviews: ReviewService,
}

impl AppState {
    /// Wire services around a database pool and a notification outbox
    pub fn new(config: Arc<AppConfig>, db: DbPool, outbox: Outbox) -> Self {
        let secret = config.auth.secret_or_ephemeral();
        let jwt = Arc::new(JwtManager::new(&secret, config.auth.token_lifetime_secs));
        let codes = ConfirmationCodes::new(secret);
        let admin = AdminPolicy::from_config(&config.access);
        let repo = Repository::new(db.clone());

        info!(superuser_is_admin = admin.superuser_is_admin, "Access policy loaded");

        Self {
            accounts: AccountService::new(repo.clone(), codes, jwt.clone(), outbox, admin),
            catalog: CatalogService::new(repo.clone(), admin),
            reviews: ReviewService::new(repo, admin),
            config,
            db,
            jwt,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    init_logging(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting YaMDb API Gateway v{}",
        yamdb_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install()?;
        info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    }
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    if config.database.bootstrap_schema {
        schema::create_schema(db.write()).await?;
    }

    // Notification outbox
    let mailer = mail::create_mailer(&config.mail)?;
    let (outbox, dispatcher) = Outbox::new(config.mail.outbox_capacity, mailer);
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    // Create app state
    let state = AppState::new(config.clone(), db, outbox);

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last outbox handles; let queued mail drain
    if tokio::time::timeout(config.shutdown_timeout(), dispatcher_handle)
        .await
        .is_err()
    {
        warn!("Notification dispatcher did not drain before the shutdown timeout");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_logging(config: &ObservabilityConfig) {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Auth endpoints (rate limited when enabled)
    let mut auth_routes = Router::new()
        .route("/auth/signup/", post(handlers::auth::signup))
        .route("/auth/token/", post(handlers::auth::token));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(limits.requests_per_second, limits.burst);
        auth_routes = auth_routes.route_layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // API routes
    let api_routes = Router::new()
        // Users
        .route("/users/", get(handlers::users::list_users).post(handlers::users::create_user))
        .route("/users/me/", get(handlers::users::me).patch(handlers::users::update_me))
        .route(
            "/users/{username}/",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )

        // Reference data
        .route(
            "/categories/",
            get(handlers::catalog::list_categories).post(handlers::catalog::create_category),
        )
        .route("/categories/{slug}/", delete(handlers::catalog::delete_category))
        .route(
            "/genres/",
            get(handlers::catalog::list_genres).post(handlers::catalog::create_genre),
        )
        .route("/genres/{slug}/", delete(handlers::catalog::delete_genre))

        // Titles
        .route("/titles/", get(handlers::titles::list_titles).post(handlers::titles::create_title))
        .route(
            "/titles/{title_id}/",
            get(handlers::titles::get_title)
                .patch(handlers::titles::update_title)
                .delete(handlers::titles::delete_title),
        )

        // Reviews
        .route(
            "/titles/{title_id}/reviews/",
            get(handlers::reviews::list_reviews).post(handlers::reviews::create_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/",
            get(handlers::reviews::get_review)
                .patch(handlers::reviews::update_review)
                .delete(handlers::reviews::delete_review),
        )

        // Comments
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/",
            get(handlers::reviews::list_comments).post(handlers::reviews::create_comment),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}/",
            get(handlers::reviews::get_comment)
                .patch(handlers::reviews::update_comment)
                .delete(handlers::reviews::delete_comment),
        )
        .merge(auth_routes);

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api/v1", api_routes)
        .layer(from_fn(middleware::metrics::track_metrics))
        .layer(TraceLayer::new_for_http().make_span_with(middleware::trace::request_span(
            &state.config.observability.service_name,
        )))
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
