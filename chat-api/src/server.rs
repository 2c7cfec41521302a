use anyhow::Result;
use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::get,
    Router,
};
use chat_core::{ChatContext, Config};
use chat_messaging::MessagingService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter};
use crate::websocket;

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.server.cors_origins {
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    // Wildcards cannot be combined with credentials.
                    Ok(_) if origin == "*" => {
                        tracing::warn!("Ignoring wildcard in CORS_ORIGIN; list origins explicitly");
                        None
                    }
                    Ok(parsed) => Some(parsed),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
        None => {
            // Default to permissive for development, but log warning
            tracing::warn!("CORS_ORIGIN not set, using permissive CORS. Set CORS_ORIGIN for production!");
            CorsLayer::permissive()
        }
    }
}

/// Full HTTP surface: websocket endpoint, REST facade and probes.
pub fn router(service: MessagingService) -> Router {
    let config = service.context().config.clone();
    let limiter = RateLimitState {
        limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        trust_proxy: config.server.trust_proxy,
    };

    let api = Router::new()
        .route("/conversations", get(handlers::get_conversations))
        .route(
            "/messages/:conversation_id",
            get(handlers::get_messages).post(handlers::post_message),
        )
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(websocket::websocket_handler))
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(service))
                .layer(cors_layer(&config)),
        )
}

pub async fn run(ctx: ChatContext) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let app = router(MessagingService::new(ctx));

    tracing::info!("Starting chat server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Chat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
