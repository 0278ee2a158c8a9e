use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::api::documents::{process_get, process_save};
use crate::auth::models::AuthenticatedUser;
use crate::db::allocator::SlugAllocator;
use crate::db::models::{Document, SaveCommand, SaveDocumentRequest, SaveDocumentResponse};
use crate::db::repository::DocumentRepository;
use crate::error::AppError;
use crate::models::slug::DocumentId;

/// The editor's view of the persistence service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentGateway: Send + Sync {
    /// Create or update a document. A request without `id` creates.
    async fn save(&self, request: SaveDocumentRequest) -> Result<SaveDocumentResponse, AppError>;

    /// Load a stored document.
    async fn fetch(&self, id: &DocumentId) -> Result<Document, AppError>;
}

/// Calls the persistence service directly, acting as a fixed author.
///
/// Used when the editor runs in the same process as the store.
pub struct InProcessGateway {
    repo: Arc<dyn DocumentRepository>,
    allocator: Arc<SlugAllocator>,
    author: AuthenticatedUser,
}

impl InProcessGateway {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        allocator: Arc<SlugAllocator>,
        author: AuthenticatedUser,
    ) -> Self {
        Self {
            repo,
            allocator,
            author,
        }
    }
}

#[async_trait]
impl DocumentGateway for InProcessGateway {
    async fn save(&self, request: SaveDocumentRequest) -> Result<SaveDocumentResponse, AppError> {
        self.author.ensure_active(chrono::Utc::now())?;
        let command = SaveCommand::try_from(request)?;
        process_save(self.repo.as_ref(), &self.allocator, &self.author, command).await
    }

    async fn fetch(&self, id: &DocumentId) -> Result<Document, AppError> {
        self.author.ensure_active(chrono::Utc::now())?;
        process_get(self.repo.as_ref(), &self.author, id.as_str()).await
    }
}

#[cfg(feature = "http-client")]
pub use http::HttpDocumentGateway;

#[cfg(feature = "http-client")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, StatusCode};
    use serde::Deserialize;

    use super::DocumentGateway;
    use crate::auth::models::AuthenticatedUser;
    use crate::auth::session::{session_cookie_value, SESSION_COOKIE};
    use crate::db::models::{Document, SaveDocumentRequest, SaveDocumentResponse};
    use crate::error::AppError;
    use crate::models::slug::DocumentId;
    use crate::models::validation::Violation;

    /// Error body returned by the document API.
    #[derive(Debug, Deserialize)]
    struct ApiErrorBody {
        error: String,
        #[serde(default)]
        violations: Vec<Violation>,
    }

    /// Talks to a remote persistence service over its JSON API.
    #[derive(Debug, Clone)]
    pub struct HttpDocumentGateway {
        client: Client,
        base_url: String,
        cookie: String,
    }

    impl HttpDocumentGateway {
        pub fn new(base_url: impl Into<String>, user: &AuthenticatedUser) -> Result<Self, AppError> {
            Self::with_client(Client::new(), base_url, user)
        }

        /// A gateway whose requests give up after `timeout`.
        pub fn with_timeout(
            base_url: impl Into<String>,
            user: &AuthenticatedUser,
            timeout: Duration,
        ) -> Result<Self, AppError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;
            Self::with_client(client, base_url, user)
        }

        fn with_client(
            client: Client,
            base_url: impl Into<String>,
            user: &AuthenticatedUser,
        ) -> Result<Self, AppError> {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            let cookie = format!("{}={}", SESSION_COOKIE, session_cookie_value(user)?);
            Ok(Self {
                client,
                base_url,
                cookie,
            })
        }

        async fn read<T: serde::de::DeserializeOwned>(
            response: reqwest::Response,
        ) -> Result<T, AppError> {
            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(map_transport_error);
            }

            let body = response.text().await.unwrap_or_default();
            let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
            let message = parsed
                .as_ref()
                .map(|b| b.error.clone())
                .unwrap_or_else(|| format!("HTTP {}", status));

            Err(match status {
                StatusCode::UNAUTHORIZED => AppError::Auth(message),
                StatusCode::FORBIDDEN => AppError::Forbidden(message),
                StatusCode::NOT_FOUND => AppError::NotFound(message),
                StatusCode::BAD_REQUEST => AppError::BadRequest(message),
                StatusCode::CONFLICT => AppError::DuplicateId(message),
                StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => AppError::Timeout(message),
                StatusCode::UNPROCESSABLE_ENTITY => {
                    AppError::Validation(parsed.map(|b| b.violations).unwrap_or_default())
                }
                _ => AppError::Internal(message),
            })
        }
    }

    fn map_transport_error(err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::Transport(err.to_string())
        }
    }

    #[async_trait]
    impl DocumentGateway for HttpDocumentGateway {
        async fn save(&self, request: SaveDocumentRequest) -> Result<SaveDocumentResponse, AppError> {
            let response = self
                .client
                .post(format!("{}/api/v1/documents", self.base_url))
                .header(reqwest::header::COOKIE, &self.cookie)
                .json(&request)
                .send()
                .await
                .map_err(map_transport_error)?;

            Self::read(response).await
        }

        async fn fetch(&self, id: &DocumentId) -> Result<Document, AppError> {
            let response = self
                .client
                .get(format!("{}/api/v1/documents/{}", self.base_url, id))
                .header(reqwest::header::COOKIE, &self.cookie)
                .send()
                .await
                .map_err(map_transport_error)?;

            Self::read(response).await
        }
    }
}
