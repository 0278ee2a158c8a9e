use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One structured unit of document content.
///
/// Serialized as `{"type": "...", "data": {...}}` so the wire shape matches
/// what block-based editors emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ContentBlock {
    Paragraph {
        text: String,
    },
    Header {
        text: String,
        #[serde(default = "default_header_level")]
        level: u8,
    },
    List {
        #[serde(default)]
        style: ListStyle,
        #[serde(default)]
        items: Vec<String>,
    },
    Quote {
        text: String,
        #[serde(default)]
        caption: String,
    },
    Code {
        code: String,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: String,
    },
    Delimiter,
}

fn default_header_level() -> u8 {
    2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStyle {
    #[default]
    Unordered,
    Ordered,
}

impl ContentBlock {
    /// A block is trivial when it carries nothing a reader would see.
    pub fn is_trivial(&self) -> bool {
        match self {
            ContentBlock::Paragraph { text }
            | ContentBlock::Header { text, .. }
            | ContentBlock::Quote { text, .. } => text.trim().is_empty(),
            ContentBlock::List { items, .. } => items.iter().all(|i| i.trim().is_empty()),
            ContentBlock::Code { code } => code.trim().is_empty(),
            ContentBlock::Image { url, .. } => url.trim().is_empty(),
            ContentBlock::Delimiter => true,
        }
    }
}

/// The editable field set of a document.
///
/// Missing fields deserialize to their empty defaults, which is what a
/// draft save expects. An empty `banner` means "no banner".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentFields {
    pub title: String,
    pub description: String,
    pub banner: String,
    pub tags: Vec<String>,
    pub content_blocks: Vec<ContentBlock>,
}

impl DocumentFields {
    /// Returns the fields with tags trimmed, lower-cased and de-duplicated.
    pub fn normalized(mut self) -> Self {
        self.tags = normalize_tags(&self.tags);
        self
    }

    /// SHA-256 over the canonical JSON form of the fields, hex encoded.
    ///
    /// Two field sets with the same fingerprint are indistinguishable to a
    /// reader, so saving one over the other changes nothing.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }
}

/// Normalize a tag list into an ordered set.
///
/// Each tag is trimmed and lower-cased; empty tags are dropped and only the
/// first occurrence of a duplicate is kept.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}
