use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::generator::TaskGenerator;
use crate::handlers;
use crate::storage::StorageBackend;
use taskflow_models::ApiResponse;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub config: Arc<Config>,
    /// `None` when no `[generator]` section is configured.
    pub generator: Option<Arc<dyn TaskGenerator>>,
}

/// Credentialed CORS for a configured origin, otherwise any origin without credentials.
fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    };
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        Err(_) => {
            tracing::warn!(origin, "invalid cors_origin, allowing any origin");
            cors_layer(None)
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let server = &state.config.server;
    let cors = cors_layer(server.cors_origin.as_deref());
    let timeout = Duration::from_secs(server.request_timeout_secs);
    let body_limit = server.body_limit_bytes;

    let api = Router::new()
        // Auth
        .route("/api/auth/me", get(handlers::auth::me))
        // Billing
        .route(
            "/api/subscriptions",
            get(handlers::subscriptions::get_subscription),
        )
        // Tasks
        .route("/api/tasks", get(handlers::tasks::list_tasks))
        .route("/api/tasks/manual", post(handlers::tasks::create_manual_task))
        .route("/api/tasks/batch", post(handlers::tasks::create_batch))
        .route("/api/tasks/generate", post(handlers::tasks::generate_tasks))
        .route("/api/tasks/by-date", get(handlers::tasks::tasks_by_date))
        .route("/api/tasks/calendar", get(handlers::tasks::calendar_tasks))
        .route(
            "/api/tasks/:id",
            get(handlers::tasks::get_task)
                .put(handlers::tasks::update_task)
                .delete(handlers::tasks::delete_task),
        )
        // Transitions
        .route(
            "/api/tasks/:id/priority",
            patch(handlers::tasks::set_priority),
        )
        .route(
            "/api/tasks/:id/complete",
            patch(handlers::tasks::toggle_complete),
        )
        .route("/api/tasks/:id/status", patch(handlers::tasks::set_status))
        .route("/api/tasks/:id/kanban", patch(handlers::tasks::kanban_move))
        .route("/api/tasks/:id/times", patch(handlers::tasks::set_times));

    api.fallback(|| async {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::message("Not found", false)),
        )
    })
    .layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(TimeoutLayer::new(timeout))
            // Responses carry per-user data
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .layer(DefaultBodyLimit::max(body_limit)),
    )
    .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

pub async fn run_server(state: AppState) -> std::io::Result<()> {
    // Spawn background expired-session purge
    {
        let storage = state.storage.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                match storage.purge_expired_sessions() {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "purged expired sessions"),
                    Err(e) => tracing::warn!(error = %e, "session purge failed"),
                }
            }
        });
    }

    let port = state.config.server.port;
    let storage = state.storage.clone();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    tracing::info!("taskflow listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Checkpoint WAL before exit to prevent data loss on restart
    match storage.checkpoint() {
        Ok(()) => tracing::info!("WAL checkpointed, shut down gracefully"),
        Err(e) => tracing::error!(error = %e, "WAL checkpoint failed"),
    }
    Ok(())
}
