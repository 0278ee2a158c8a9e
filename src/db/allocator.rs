use std::future::Future;

use chrono::Utc;
use rand::Rng;

use crate::config::AllocatorConfig;
use crate::db::repository::DocumentRepository;
use crate::error::AppError;
use crate::models::slug::{compose_id, normalize_title, DocumentId, ID_MAX_LEN, ID_MIN_LEN};

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MIN_SUFFIX_LEN: usize = 4;
const MAX_SUFFIX_LEN: usize = ID_MAX_LEN - ID_MIN_LEN;
const FALLBACK_TAIL_LEN: usize = 4;
const DEFAULT_PLACEHOLDER_BASE: &str = "untitled";

/// The outcome of an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: DocumentId,
    /// How many generated candidates were checked.
    pub attempts: u32,
    /// Whether every candidate collided and the fallback was used.
    pub fell_back: bool,
}

/// Draw candidates from `generate` until `exists` reports one as free.
///
/// At most `max_attempts` candidates are checked. When all of them are taken
/// the candidate from `fallback` is returned unchecked, so callers must still
/// rely on a storage-level uniqueness constraint.
pub async fn retry_with_fresh_candidate<G, E, Fut, F>(
    max_attempts: u32,
    mut generate: G,
    mut exists: E,
    fallback: F,
) -> Result<Allocation, AppError>
where
    G: FnMut() -> Result<DocumentId, AppError>,
    E: FnMut(DocumentId) -> Fut,
    Fut: Future<Output = Result<bool, AppError>>,
    F: FnOnce() -> Result<DocumentId, AppError>,
{
    for attempt in 1..=max_attempts {
        let candidate = generate()?;
        if !exists(candidate.clone()).await? {
            return Ok(Allocation {
                id: candidate,
                attempts: attempt,
                fell_back: false,
            });
        }
        tracing::debug!(candidate = %candidate, attempt, "Identifier candidate already taken");
    }

    let id = fallback()?;
    tracing::warn!(
        id = %id,
        attempts = max_attempts,
        "Identifier candidates exhausted, using timestamp fallback"
    );
    Ok(Allocation {
        id,
        attempts: max_attempts,
        fell_back: true,
    })
}

/// Derives unique document ids from titles.
#[derive(Debug, Clone)]
pub struct SlugAllocator {
    max_attempts: u32,
    suffix_len: usize,
    placeholder_base: String,
}

impl Default for SlugAllocator {
    fn default() -> Self {
        Self::new(&AllocatorConfig::default())
    }
}

impl SlugAllocator {
    pub fn new(config: &AllocatorConfig) -> Self {
        let placeholder_base = match normalize_title(&config.placeholder_base) {
            base if base.is_empty() => DEFAULT_PLACEHOLDER_BASE.to_string(),
            base => base,
        };

        Self {
            max_attempts: config.max_attempts,
            suffix_len: config.suffix_len.clamp(MIN_SUFFIX_LEN, MAX_SUFFIX_LEN),
            placeholder_base,
        }
    }

    /// The slug base for `title`, or the placeholder when nothing survives
    /// normalization.
    pub fn base_for(&self, title: &str) -> String {
        match normalize_title(title) {
            base if base.is_empty() => self.placeholder_base.clone(),
            base => base,
        }
    }

    /// Allocate an id for a document titled `title` that no stored document
    /// uses at the time of the check.
    pub async fn allocate(
        &self,
        title: &str,
        repo: &dyn DocumentRepository,
    ) -> Result<Allocation, AppError> {
        let base = self.base_for(title);

        retry_with_fresh_candidate(
            self.max_attempts,
            || DocumentId::parse(&compose_id(&base, &random_suffix(self.suffix_len))),
            |candidate| async move { repo.exists(&candidate).await },
            || DocumentId::parse(&compose_id(&base, &timestamp_suffix())),
        )
        .await
    }
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Base-36 milliseconds since the epoch plus a short random tail.
fn timestamp_suffix() -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    format!("{}{}", to_base36(millis), random_suffix(FALLBACK_TAIL_LEN))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(SUFFIX_ALPHABET[((value % 36) as usize + 26) % 36]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
