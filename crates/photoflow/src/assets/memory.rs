use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::assets::{AssetError, AssetRef, AssetStore, Namespace};

pub struct InMemoryAssetStore {
    objects: Mutex<HashMap<AssetRef, Vec<u8>>>,
    ns: Namespace,
    fail_puts: AtomicBool,
}

impl InMemoryAssetStore {
    pub fn new(public_base_url: &str) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            ns: Namespace::new(public_base_url),
            fail_puts: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `put` fail with an io error.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<AssetRef, Vec<u8>>>, AssetError> {
        self.objects
            .lock()
            .map_err(|_| AssetError::Io(std::io::Error::other("asset store lock poisoned")))
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn put(
        &self,
        owner_id: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<AssetRef, AssetError> {
        let (asset, _) = self.ns.mint(owner_id, content_type)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AssetError::Io(std::io::Error::other("injected put failure")));
        }
        self.lock()?.insert(asset.clone(), bytes);
        Ok(asset)
    }

    async fn get(&self, owner_id: &str, asset: &AssetRef) -> Result<Vec<u8>, AssetError> {
        self.ns.file_name(owner_id, asset)?;
        self.lock()?.get(asset).cloned().ok_or(AssetError::NotFound)
    }

    async fn delete(&self, owner_id: &str, asset: &AssetRef) -> Result<(), AssetError> {
        self.ns.file_name(owner_id, asset)?;
        self.lock()?
            .remove(asset)
            .map(|_| ())
            .ok_or(AssetError::NotFound)
    }
}
