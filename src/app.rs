use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::db::allocator::SlugAllocator;
use crate::db::repository::DocumentRepository;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub document_repo: Arc<dyn DocumentRepository>,
    pub allocator: Arc<SlugAllocator>,
}

impl AppState {
    pub fn new(document_repo: Arc<dyn DocumentRepository>, allocator: SlugAllocator) -> Self {
        Self {
            document_repo,
            allocator: Arc::new(allocator),
        }
    }
}

/// Build the Axum router with every document route.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/documents",
            post(api::documents::save_document_handler),
        )
        .route(
            "/api/v1/documents/{id}",
            get(api::documents::get_document_handler)
                .put(api::documents::update_document_handler),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
