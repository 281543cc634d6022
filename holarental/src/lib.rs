//! # holarental: back end for a two-sided rental marketplace
//!
//! `holarental` serves the HolaRental marketplace, where landlords list housing areas and rooms
//! and tenants find, rent and pay for them. It exposes a JSON API under `/api` for the web and
//! mobile clients, with OpenAPI documentation rendered at `/docs`.
//!
//! ## Overview
//!
//! A landlord registers, lists a housing area, and adds rooms to it. Once an admin approves the
//! listing its rooms show up in search. A tenant requests a contract for an available room; both
//! parties sign, the tenant pays the deposit through ZaloPay, and the contract becomes active.
//! From there the contract can be extended, terminated by mutual agreement, disputed, or left to
//! expire at its end date. Landlords pay a service fee per active contract and can buy listing
//! boosts. Tenants and landlords talk through a built-in chat with a live server-sent event feed.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! uses PostgreSQL for all persistence.
//!
//! ### Request Flow
//!
//! Every request to `/api/*` resolves the caller from a bearer token or the session cookie
//! ([`auth`]), checks the caller's role grants, then runs the handler. Handlers load rows through
//! the repositories in [`db`], apply the business rules, and write back in a single database
//! transaction. Contract status changes all go through the state machine in [`lifecycle`], and
//! every contract write is a compare-and-set on the row version so concurrent requests cannot
//! both win.
//!
//! Payments follow the gateway's flow: a pending transaction is created, the client opens a
//! checkout to get a ZaloPay order URL, and the transaction settles when ZaloPay calls back (or
//! when the client asks for a status sync). Settlement is idempotent per gateway reference.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) holds the handlers and the request/response models. The
//! **authentication layer** ([`auth`]) issues session tokens, verifies Supabase access tokens, and
//! maps roles to permissions. The **database layer** ([`db`]) wraps each table in a repository.
//!
//! **Background services** run alongside the HTTP server: the sweeper ([`sweeper`]) expires
//! contracts past their end date and cancels abandoned payments.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use holarental::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = holarental::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     holarental::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
mod openapi;
pub mod payment_providers;
pub mod realtime;
pub mod sweeper;
pub mod telemetry;
pub mod types;
pub mod validation;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::users::Role,
    auth::password,
    config::CorsOrigin,
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
    realtime::ChatHub,
};
use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{ContractId, DisputeId, HousingAreaId, RoomId, TransactionId, UserId};

/// Application state shared across all request handlers.
///
/// # Fields
///
/// - `db`: PostgreSQL connection pool
/// - `config`: Application configuration loaded from file and environment
/// - `payment_provider`: The configured payment gateway, if any. Payment endpoints answer
///   501 without one.
/// - `chat_hub`: In-process fan-out of new chat messages to open SSE streams
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .chat_hub(ChatHub::default())
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
    pub chat_hub: ChatHub,
}

/// Get the holarental database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: an existing account with this email has the admin role and the given password
/// (if any) applied, otherwise a new admin account is created. Called on every startup so there
/// is always an admin who can approve listings.
///
/// # Example
///
/// ```no_run
/// # use holarental::create_initial_admin_user;
/// # use sqlx::PgPool;
/// # async fn example(pool: PgPool) -> anyhow::Result<()> {
/// let user_id = create_initial_admin_user("admin@holarental.vn", Some("secure_password"), &pool).await?;
/// # Ok(())
/// # }
/// ```
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, password: Option<&str>, db: &PgPool) -> anyhow::Result<UserId> {
    let email = email.trim().to_lowercase();
    let password_hash = match password {
        Some(pwd) => Some(password::hash_string(pwd).map_err(|e| anyhow::anyhow!("Failed to hash admin password: {e}"))?),
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing_user) = user_repo.get_user_by_email(&email).await? {
        let mut roles = existing_user.roles.clone();
        if !roles.contains(&Role::Admin) {
            roles.push(Role::Admin);
        }
        user_repo
            .update(
                existing_user.id,
                &UserUpdateDBRequest {
                    roles: Some(roles),
                    password_hash,
                    ..Default::default()
                },
            )
            .await?;
        tx.commit().await?;
        return Ok(existing_user.id);
    }

    let created_user = user_repo
        .create(&UserCreateDBRequest {
            username: email.clone(),
            email: email.clone(),
            display_name: Some("Administrator".to_string()),
            avatar_url: None,
            roles: vec![Role::Admin],
            auth_source: "system".to_string(),
            password_hash,
            external_id: None,
        })
        .await?;

    tx.commit().await?;
    info!(%email, "Created initial admin user");
    Ok(created_user.id)
}

/// Connect to the database and run migrations.
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url()
        .ok_or_else(|| anyhow::anyhow!("No database configured: set DATABASE_URL or database.url"))?;

    let settings = &config.database.pool;
    let mut options = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs));
    if settings.idle_timeout_secs > 0 {
        options = options.idle_timeout(Duration::from_secs(settings.idle_timeout_secs));
    }
    if settings.max_lifetime_secs > 0 {
        options = options.max_lifetime(Duration::from_secs(settings.max_lifetime_secs));
    }

    let pool = options.connect(database_url).await?;
    migrator().run(&pool).await?;

    create_initial_admin_user(&config.admin_email, config.admin_password.as_deref(), &pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {e}"))?;

    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut exposed_headers = Vec::new();
    for header in &config.auth.security.cors.exposed_headers {
        exposed_headers.push(header.parse::<http::HeaderName>()?);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(exposed_headers);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `/api/*`: the marketplace API
/// - `/docs` and `/api-docs/openapi.json`: API documentation
/// - `/healthz`: liveness check
/// - `/internal/metrics`: Prometheus metrics, when enabled
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, chat, config, contracts, disputes, housing_areas, payments, rooms, transactions, users};

    let api_routes = Router::new()
        .route("/config", get(config::get_config))
        // Authentication
        .route("/auth/register", get(auth::get_registration_info).post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/password-change", post(auth::change_password))
        .route("/auth/me", get(auth::me))
        // Users and profiles
        .route("/users", get(users::list_users))
        .route(
            "/users/{user_id}",
            get(users::get_user).patch(users::update_user_roles).delete(users::delete_user),
        )
        .route("/users/{user_id}/profile", get(users::get_profile).put(users::update_profile))
        .route("/users/{user_id}/verification", patch(users::set_verification))
        // Listings
        .route(
            "/housing-areas",
            get(housing_areas::list_housing_areas).post(housing_areas::create_housing_area),
        )
        .route(
            "/housing-areas/{id}",
            get(housing_areas::get_housing_area)
                .patch(housing_areas::update_housing_area)
                .delete(housing_areas::delete_housing_area),
        )
        .route("/housing-areas/{id}/review", patch(housing_areas::review_housing_area))
        .route(
            "/housing-areas/{id}/rooms",
            get(rooms::list_area_rooms).post(rooms::create_room),
        )
        .route("/rooms", get(rooms::search_rooms))
        .route(
            "/rooms/{id}",
            get(rooms::get_room).patch(rooms::update_room).delete(rooms::delete_room),
        )
        // Contracts
        .route("/contracts", get(contracts::list_contracts).post(contracts::create_contract))
        .route("/contracts/{id}", get(contracts::get_contract))
        .route("/contracts/{id}/sign", post(contracts::sign_contract))
        .route("/contracts/{id}/cancel", post(contracts::cancel_contract))
        .route("/contracts/{id}/extension", post(contracts::request_extension))
        .route("/contracts/{id}/extension/respond", post(contracts::respond_extension))
        .route("/contracts/{id}/termination", post(contracts::request_termination))
        .route("/contracts/{id}/termination/confirm", post(contracts::confirm_termination))
        .route("/contracts/{id}/termination/withdraw", post(contracts::withdraw_termination))
        // Transactions and payments
        .route(
            "/transactions",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route("/transactions/refunds", post(transactions::create_refund))
        .route("/transactions/{id}", get(transactions::get_transaction))
        .route("/transactions/{id}/cancel", post(transactions::cancel_transaction))
        .route("/payments/{id}/checkout", post(payments::create_checkout))
        .route("/payments/{id}/sync", post(payments::sync_payment))
        // Called by ZaloPay; authenticated by the callback MAC
        .route("/payments/zalopay/callback", post(payments::zalopay_callback))
        // Disputes
        .route("/disputes", get(disputes::list_disputes).post(disputes::create_dispute))
        .route("/disputes/{id}", get(disputes::get_dispute))
        .route("/disputes/{id}/review", post(disputes::review_dispute))
        .route("/disputes/{id}/withdraw", post(disputes::withdraw_dispute))
        .route("/disputes/{id}/resolve", post(disputes::resolve_dispute))
        // Chat
        .route(
            "/chat/conversations",
            get(chat::list_conversations).post(chat::open_conversation),
        )
        .route(
            "/chat/conversations/{id}/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        .route("/chat/conversations/{id}/read", post(chat::mark_read))
        .route("/chat/stream", get(chat::stream_messages))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background services and their lifecycle management.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signalling every task to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(pool: PgPool, config: &Config, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.sweeper.enabled {
        let sweeper_config = config.sweeper.clone();
        let sweeper_shutdown = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            sweeper::run_sweeper(sweeper_config, pool, sweeper_shutdown).await;
        }));
    } else {
        info!("Sweeper disabled by configuration");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, ensures the
///    admin account, builds the payment provider, and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, gracefully stops all services
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting HolaRental with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;

        let payment_provider = match config.payment.clone() {
            Some(payment) => {
                let provider = payment_providers::create_provider(payment)?;
                info!(provider = provider.name(), "Payment provider configured");
                Some(provider)
            }
            None => {
                info!("No payment provider configured, payment endpoints will answer 501");
                None
            }
        };

        let shutdown_token = CancellationToken::new();
        let bg_services = setup_background_services(pool.clone(), &config, shutdown_token);

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .maybe_payment_provider(payment_provider)
            .chat_hub(ChatHub::default())
            .build();

        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "HolaRental listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

/// Run one sweeper pass against the configured database, then close the pool.
///
/// Startup is the same as for [`Application::new`] (migrations, admin account) without the
/// router or the background sweeper.
pub async fn sweep_now(config: &Config) -> anyhow::Result<sweeper::SweepReport> {
    let pool = setup_database(config).await?;
    let report = sweeper::sweep_once(&pool, &config.sweeper, chrono::Utc::now()).await;
    pool.close().await;
    report
}

#[cfg(test)]
mod test {
    use crate::test_utils::{create_test_config, create_test_server, create_test_state, create_test_state_with};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_healthz() {
        let server = create_test_server(create_test_state());
        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let server = create_test_server(create_test_state());
        let response = server.get("/api-docs/openapi.json").await;
        response.assert_status_ok();
        let json: serde_json::Value = response.json();
        assert_eq!(json["servers"][0]["url"], "/api");
        assert!(json["paths"]["/contracts"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let server = create_test_server(create_test_state());
        server.get("/api/nope").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins =
            vec![crate::config::CorsOrigin::Url("https://holarental.vn".parse().unwrap())];
        let server = create_test_server(create_test_state_with(config));

        let response = server
            .method(axum::http::Method::OPTIONS, "/api/rooms")
            .add_header("origin", "https://holarental.vn")
            .add_header("access-control-request-method", "GET")
            .await;
        assert_eq!(
            response.header("access-control-allow-origin"),
            "https://holarental.vn"
        );
    }
}
