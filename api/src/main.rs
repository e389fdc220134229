use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use portrait_mcp_runtime::{ClientPool, HostedLinkApi, StreamableHttpConnector};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod sanitize;
mod services;
mod state;

#[cfg(test)]
mod testing;

use config::Settings;
use middleware::ip_blocker::IpBlockLayer;
use middleware::session::{SessionKeys, SessionLayer};
use services::analytics::Analytics;
use services::geolocation::Geolocator;
use services::portrait::PortraitGenerator;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Data Portrait API",
        version = "0.1.0",
        description = "Retrieves purchase history from linked retail accounts and turns it into a generated portrait."
    ),
    paths(
        routes::health::health_check,
        routes::purchase_history::get_purchase_history,
        routes::purchase_history::get_purchase_history_details,
        routes::purchase_history::poll_link,
        routes::link::create_link,
        routes::link::link_status,
        routes::auth_proxy::auth_proxy,
        routes::portrait::generate_portrait,
        routes::analytics::record_analytics,
        routes::analytics::record_log,
    ),
    components(schemas(
        HealthResponse,
        portrait_core::error::ApiError,
        portrait_core::PurchaseHistoryRecord,
        routes::purchase_history::PurchaseHistoryResponse,
        routes::purchase_history::OrderDetailResponse,
        routes::purchase_history::PollResponse,
        routes::link::CreateLinkRequest,
        routes::link::CreateLinkResponse,
        routes::link::LinkStatusResponse,
        routes::portrait::PortraitRequest,
        routes::portrait::PortraitResponse,
        services::portrait::GeneratedImage,
        services::geolocation::LocationData,
        routes::analytics::AnalyticsRequest,
        routes::analytics::LogRequest,
        routes::analytics::SuccessResponse,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Unix seconds
    pub timestamp: i64,
    pub service: String,
    pub version: String,
    /// Tool clients currently held by the session pool
    pub active_clients: usize,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "portrait_api=debug,portrait_mcp_runtime=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            tracing::error!(event = "config_invalid", error = %err);
            std::process::exit(1);
        }
    };

    let connector = StreamableHttpConnector::new(&settings.getgather_url, settings.tool_timeout)
        .expect("Failed to build tool service connector");
    let pool = Arc::new(ClientPool::new(Arc::new(connector), settings.pool_options()));
    let sweeper = pool.spawn_sweeper();

    let http = reqwest::Client::new();
    let sessions = match &settings.session_secret {
        Some(secret) => SessionKeys::new(secret.as_bytes(), settings.production),
        None => {
            tracing::warn!(event = "session_secret_missing", "sessions will not survive a restart");
            SessionKeys::random(settings.production)
        }
    };
    let geo = Arc::new(Geolocator::new(http.clone(), settings.maxmind.clone()));
    let analytics = Analytics::new(http.clone(), settings.segment_write_key.clone());

    let generated_dir = settings.public_dir.join("generated");
    let portraits = settings.together_api_key.clone().map(|key| {
        let generator = Arc::new(PortraitGenerator::new(
            http.clone(),
            key,
            generated_dir.clone(),
        ));
        generator.spawn_cleanup();
        generator
    });
    if portraits.is_none() {
        tracing::warn!(event = "portrait_provider_missing", "TOGETHER_API_KEY is not set");
    }

    let app_state = state::AppState {
        settings: settings.clone(),
        pool: pool.clone(),
        links: HostedLinkApi::new(http.clone(), &settings.getgather_url),
        http,
        sessions: sessions.clone(),
        geo: geo.clone(),
        analytics,
        portraits,
    };

    let getgather = Router::new()
        .merge(routes::purchase_history::router().layer(middleware::rate_limit::tools_layer()))
        .merge(routes::link::router().layer(middleware::rate_limit::tools_layer()))
        .merge(routes::auth_proxy::router().layer(middleware::rate_limit::auth_layer()))
        .merge(routes::portrait::router().layer(middleware::rate_limit::portrait_layer()))
        .merge(routes::analytics::router());

    let static_dir = settings.static_dir.clone();
    let spa = ServeDir::new(&static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .nest("/getgather", getgather)
        .merge(routes::proxy::router())
        .nest_service("/generated", ServeDir::new(&generated_dir))
        .fallback_service(spa)
        .layer(SessionLayer::new(sessions))
        .layer(IpBlockLayer::new(geo))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    settings.production,
                    middleware::security_headers::apply,
                ))
                .layer(middleware::cors::build_cors_layer(&settings.cors_origins)),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("Data Portrait API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    sweeper.abort();
    pool.shutdown().await;
    tracing::info!(event = "shutdown_complete");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(event = "signal_handler_failed", error = %err);
        std::future::pending::<()>().await;
    }
    tracing::info!(event = "shutdown_requested");
}
