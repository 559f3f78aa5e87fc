//! In-process registry of generated image bytes.
//!
//! Every image lives here behind an [`ImageHandle`] and is served from
//! `/api/images/<id>`. The handle owns its entry: dropping it removes the
//! bytes, so a superseded result never lingers.

use bytes::Bytes;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

pub const IMAGE_ROUTE_PREFIX: &str = "/api/images";

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[derive(Debug, Default)]
pub struct ImageStore {
    blobs: RwLock<HashMap<Uuid, StoredImage>>,
}

impl ImageStore {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn insert(self: &Arc<Self>, bytes: Bytes, mime_type: impl Into<String>) -> ImageHandle {
        let id = Uuid::new_v4();
        let mime_type = mime_type.into();
        self.blobs.write().insert(id, StoredImage { bytes, mime_type: mime_type.clone() });
        tracing::debug!("🗂️ Stored image {} ({} images held)", id, self.len());
        ImageHandle { id, mime_type, store: Arc::clone(self) }
    }

    pub fn get(&self, id: &Uuid) -> Option<StoredImage> {
        self.blobs.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    fn release(&self, id: &Uuid) {
        if self.blobs.write().remove(id).is_some() {
            tracing::debug!("🧹 Released image {}", id);
        }
    }
}

/// Owning reference to one stored image. Not `Clone`: there is exactly one owner.
#[derive(Debug)]
pub struct ImageHandle {
    id: Uuid,
    mime_type: String,
    store: Arc<ImageStore>,
}

impl ImageHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{}/{}", IMAGE_ROUTE_PREFIX, self.id)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> Option<Bytes> {
        self.store.get(&self.id).map(|img| img.bytes)
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}
