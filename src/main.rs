use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use redis::Client as RedisClient;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portal_api::{
    config::Config,
    middleware::rate_limit::RedisAttemptCounter,
    routes,
    services::{
        announcements::AnnouncementService,
        apps_script::AppsScriptClient,
        assistant::{AssistantService, GeminiClient},
        catalog::CatalogService,
        live::{spawn_access_poller, LiveHub},
        metrics,
        profiles::ProfileService,
        session::{AuthService, RedisSessionEpochs, SessionEpochs},
        store::Stores,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let config = Arc::new(config);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let stores = Stores::open(&config, http.clone());
    let profiles = ProfileService::new(stores.profiles.clone(), stores.photos.clone());
    match stores.profiles.ping().await {
        Ok(()) => info!("Profile store reachable ({:?})", config.store_backend),
        Err(e) => tracing::warn!("Profile store not reachable yet: {}", e),
    }

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client
        .get_multiplexed_async_connection()
        .await?;
    info!("Redis connected");

    let hub = LiveHub::new();
    let epochs: Arc<dyn SessionEpochs> = Arc::new(RedisSessionEpochs::new(redis_conn.clone()));
    let auth = AuthService::new(
        AppsScriptClient::new(http.clone(), config.apps_script_url.clone()),
        profiles.clone(),
        epochs.clone(),
        hub.clone(),
        config.jwt_secret.clone(),
        config.jwt_expiry_seconds,
    );

    let assistant = match &config.gemini_api_key {
        Some(key) => {
            info!("Assistant enabled (model {})", config.gemini_model);
            AssistantService::new(Some(GeminiClient::new(http.clone(), key, &config.gemini_model)))
        }
        None => {
            info!("GEMINI_API_KEY not set, assistant disabled");
            AssistantService::new(None)
        }
    };

    let departments = CatalogService::load(config.departments_file.as_deref()).await?;

    spawn_access_poller(
        hub.clone(),
        profiles.clone(),
        epochs,
        Duration::from_secs(config.access_poll_seconds.max(1)),
    );
    metrics::start(profiles.clone());

    let state = AppState {
        limiter: Arc::new(RedisAttemptCounter::new(redis_conn)),
        config: config.clone(),
        announcements: AnnouncementService::new(stores.announcements.clone(), hub.clone()),
        profiles,
        auth,
        assistant,
        hub,
        departments: Arc::new(departments),
    };

    // Allow the portal's own origin and its subdomains.
    // In development (localhost), all local origins are allowed.
    let base_url = config.app_base_url.clone();
    let cors_origin = {
        let base = base_url.clone();
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let o = match origin.to_str() {
                Ok(s) => s,
                Err(_) => return false,
            };
            if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
                return true;
            }
            if o == base {
                return true;
            }
            if let Some(idx) = base.find("://") {
                let after_scheme = &base[idx + 3..];
                let domain = after_scheme.split('/').next().unwrap_or(after_scheme);
                let domain_clean = domain.split(':').next().unwrap_or(domain);
                if o.ends_with(&format!(".{domain_clean}")) {
                    return true;
                }
            }
            false
        })
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Auth
        .route("/auth/sign-up", post(routes::auth::sign_up))
        .route("/auth/sign-in", post(routes::auth::sign_in))
        .route("/auth/forgot-password", post(routes::auth::forgot_password))
        .route("/auth/reset-password", post(routes::auth::reset_password))
        .route("/auth/session", get(routes::auth::session))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/profile", put(routes::auth::update_profile))
        .route("/auth/profile/photo", post(routes::auth::upload_photo))
        // Users & access
        .route("/users", get(routes::users::list_users))
        .route("/users/access", get(routes::users::my_access))
        .route("/users/{email}/access", put(routes::users::update_access))
        .route("/users/{email}/role", put(routes::users::update_role))
        .route("/birthdays", get(routes::birthdays::list_birthdays))
        // Announcements
        .route(
            "/announcements",
            get(routes::announcements::list_announcements)
                .post(routes::announcements::create_announcement),
        )
        .route("/announcements/views", post(routes::announcements::mark_all_viewed))
        .route(
            "/announcements/{id}/views",
            get(routes::announcements::list_views).post(routes::announcements::record_view),
        )
        // Assistant
        .route("/assistant/ask", post(routes::assistant::ask))
        .route("/assistant/search", post(routes::assistant::search))
        .route("/departments", get(routes::departments::list_departments))
        // WebSocket
        .route("/ws", get(routes::websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Avatar uploads are re-encoded server-side; 10 MB covers phone photos.
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Portal API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
