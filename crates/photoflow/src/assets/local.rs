use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::assets::{AssetError, AssetRef, AssetStore, Namespace};

/// Files on local disk under `{root}/{owner}/`, served elsewhere at
/// `{public_base}/{owner}/`.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    ns: Namespace,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            ns: Namespace::new(public_base_url),
        }
    }

    fn path_for(&self, owner_id: &str, file_name: &str) -> PathBuf {
        self.root.join(owner_id).join(file_name)
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(
        &self,
        owner_id: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<AssetRef, AssetError> {
        let (asset, file_name) = self.ns.mint(owner_id, content_type)?;
        let dir = self.root.join(owner_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), bytes).await?;
        tracing::debug!(user_id = owner_id, asset = %asset, "asset stored");
        Ok(asset)
    }

    async fn get(&self, owner_id: &str, asset: &AssetRef) -> Result<Vec<u8>, AssetError> {
        let file_name = self.ns.file_name(owner_id, asset)?;
        match tokio::fs::read(self.path_for(owner_id, file_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AssetError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, owner_id: &str, asset: &AssetRef) -> Result<(), AssetError> {
        let file_name = self.ns.file_name(owner_id, asset)?;
        match tokio::fs::remove_file(self.path_for(owner_id, file_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AssetError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
