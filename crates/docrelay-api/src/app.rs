//! Application builder and HTTP server loop.

use std::future::Future;

use axum::Router;
use tokio::net::TcpListener;

use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;

use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application.
pub fn build_app(state: AppState) -> Router {
    build_router(state)
}

/// Serve the application until `shutdown` resolves, then finish the
/// requests already in progress.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("DocRelay listening on {}", addr);
    }

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))
}
