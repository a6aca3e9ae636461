//! Media storage namespaced per user.
//!
//! References are public URLs of the form `{base}/{owner}/{uuid}.{ext}`.
//! Every operation takes the acting owner and refuses references that do not
//! live under that owner's prefix.

pub mod local;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use local::LocalAssetStore;
pub use memory::InMemoryAssetStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("owner id is not a valid storage namespace")]
    InvalidOwner,

    #[error("asset reference is outside the owner's namespace")]
    OutsideNamespace,

    #[error("asset not found")]
    NotFound,

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("asset io: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn put(&self, owner_id: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<AssetRef, AssetError>;

    async fn get(&self, owner_id: &str, asset: &AssetRef) -> Result<Vec<u8>, AssetError>;

    async fn delete(&self, owner_id: &str, asset: &AssetRef) -> Result<(), AssetError>;
}

/// Owner ids become path segments, so only a conservative alphabet passes.
pub fn is_valid_owner_id(owner_id: &str) -> bool {
    !owner_id.is_empty()
        && owner_id.len() <= 128
        && owner_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "video/mp4" => Some("mp4"),
        _ => None,
    }
}

/// Guess a content type from the extension of a URL or path.
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "mp4" => Some("video/mp4"),
        _ => None,
    }
}

/// Builds and parses references under one public base URL.
#[derive(Debug, Clone)]
pub(crate) struct Namespace {
    base: String,
}

impl Namespace {
    pub(crate) fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn mint(
        &self,
        owner_id: &str,
        content_type: &str,
    ) -> Result<(AssetRef, String), AssetError> {
        if !is_valid_owner_id(owner_id) {
            return Err(AssetError::InvalidOwner);
        }
        let ext = extension_for(content_type)
            .ok_or_else(|| AssetError::UnsupportedContentType(content_type.to_string()))?;
        let file_name = format!("{}.{ext}", Uuid::new_v4());
        let asset = AssetRef(format!("{}/{owner_id}/{file_name}", self.base));
        Ok((asset, file_name))
    }

    /// Returns the file name if `asset` is directly under `owner_id`'s prefix.
    pub(crate) fn file_name<'a>(
        &self,
        owner_id: &str,
        asset: &'a AssetRef,
    ) -> Result<&'a str, AssetError> {
        if !is_valid_owner_id(owner_id) {
            return Err(AssetError::InvalidOwner);
        }
        let rest = asset
            .as_str()
            .strip_prefix(self.base.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .and_then(|r| r.strip_prefix(owner_id))
            .and_then(|r| r.strip_prefix('/'))
            .ok_or(AssetError::OutsideNamespace)?;

        let well_formed = !rest.is_empty()
            && !rest.starts_with('.')
            && rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !well_formed {
            return Err(AssetError::OutsideNamespace);
        }
        Ok(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_alphabet_is_path_safe() {
        assert!(is_valid_owner_id("user_42-a"));
        assert!(!is_valid_owner_id(""));
        assert!(!is_valid_owner_id("../etc"));
        assert!(!is_valid_owner_id("a/b"));
        assert!(!is_valid_owner_id(&"x".repeat(129)));
    }

    #[test]
    fn references_outside_namespace_are_rejected() {
        let ns = Namespace::new("https://cdn.test/assets/");
        let (asset, name) = ns.mint("alice", "image/png").unwrap();
        assert!(asset.as_str().starts_with("https://cdn.test/assets/alice/"));
        assert_eq!(ns.file_name("alice", &asset).unwrap(), name);

        assert!(matches!(
            ns.file_name("bob", &asset),
            Err(AssetError::OutsideNamespace)
        ));
        // prefix match must stop at a path boundary
        assert!(matches!(
            ns.file_name("alic", &asset),
            Err(AssetError::OutsideNamespace)
        ));
        let traversal = AssetRef::new("https://cdn.test/assets/alice/../bob/x.png");
        assert!(matches!(
            ns.file_name("alice", &traversal),
            Err(AssetError::OutsideNamespace)
        ));
    }

    #[test]
    fn content_type_from_url_ignores_query() {
        assert_eq!(
            content_type_for_path("https://e/out/clip.MP4?sig=abc"),
            Some("video/mp4")
        );
        assert_eq!(content_type_for_path("https://e/out/blob"), None);
    }

    #[test]
    fn unknown_content_type_is_refused() {
        let ns = Namespace::new("http://x");
        assert!(matches!(
            ns.mint("alice", "application/zip"),
            Err(AssetError::UnsupportedContentType(_))
        ));
    }
}
