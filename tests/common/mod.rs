#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use cookie::Cookie;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::mongo::Mongo;

use quire::app::{build_router, AppState};
use quire::auth::models::AuthenticatedUser;
use quire::auth::session::{session_cookie_value, SESSION_COOKIE};
use quire::db::allocator::SlugAllocator;
use quire::db::repository::{DocumentRepository, MongoDocumentRepository};

/// Holds the running MongoDB container and provides the Axum router for
/// integration tests.
///
/// The container is kept alive for as long as this struct lives. When
/// dropped, it is stopped and cleaned up automatically.
pub struct TestEnv {
    _mongo: ContainerAsync<Mongo>,
    pub router: Router,
    pub repo: Arc<dyn DocumentRepository>,
    pub allocator: Arc<SlugAllocator>,
}

impl TestEnv {
    /// Spin up MongoDB and build an Axum router wired to it.
    pub async fn start() -> Self {
        let mongo_container = Mongo::default()
            .start()
            .await
            .expect("Failed to start MongoDB container");

        let mongo_port = mongo_container
            .get_host_port_ipv4(27017)
            .await
            .expect("Failed to get MongoDB port");
        let mongo_uri = format!("mongodb://127.0.0.1:{}", mongo_port);
        let mongo_client = mongodb::Client::with_uri_str(&mongo_uri)
            .await
            .expect("Failed to connect to MongoDB");
        let mongo_db = mongo_client.database("quire_test");

        let mongo_repo = MongoDocumentRepository::new(&mongo_db);
        mongo_repo
            .ensure_indexes()
            .await
            .expect("Failed to create indexes");
        let repo: Arc<dyn DocumentRepository> = Arc::new(mongo_repo);

        let state = AppState::new(repo.clone(), SlugAllocator::default());
        let allocator = state.allocator.clone();
        let router = build_router(state);

        Self {
            _mongo: mongo_container,
            router,
            repo,
            allocator,
        }
    }

    /// Build an `axum_test::TestServer` from this environment's router.
    pub fn server(&self) -> axum_test::TestServer {
        axum_test::TestServer::builder()
            .expect_success_by_default()
            .try_build(self.router.clone())
            .expect("Failed to build TestServer")
    }

    /// Build a `TestServer` that does NOT expect success by default (for error tests).
    pub fn server_permissive(&self) -> axum_test::TestServer {
        axum_test::TestServer::builder()
            .try_build(self.router.clone())
            .expect("Failed to build TestServer")
    }
}

/// A user with a unique id, so tests sharing nothing can still share a store.
pub fn author(name: &str) -> AuthenticatedUser {
    AuthenticatedUser::new(
        format!("{}-{}", name, uuid::Uuid::new_v4().simple()),
        format!("{}@example.com", name),
    )
}

/// The session cookie a logged-in browser would send for `user`.
pub fn session_cookie(user: &AuthenticatedUser) -> Cookie<'static> {
    let value = session_cookie_value(user).expect("Failed to encode session");
    Cookie::new(SESSION_COOKIE, value)
}

/// A request body that passes every publish rule.
pub fn publishable_body(title: &str) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "description": "A short summary",
        "banner": "https://img.example.com/banner.png",
        "tags": ["Rust", "rust", "Async"],
        "contentBlocks": [
            {"type": "header", "data": {"text": "Intro", "level": 2}},
            {"type": "paragraph", "data": {"text": "Hello world"}}
        ]
    })
}
