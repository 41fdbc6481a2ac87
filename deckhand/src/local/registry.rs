//! In-memory image registry

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::ImageRegistry;
use crate::errors::DeckhandError;
use crate::models::image::{ImageDigest, ImageRef};

/// Image registry held in memory. Tags are immutable: re-pushing a tag with
/// the same digest succeeds, a different digest is rejected.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    images: RwLock<HashMap<String, ImageDigest>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digest(&self, image: &ImageRef) -> Option<ImageDigest> {
        let images = self.images.read().unwrap_or_else(|e| e.into_inner());
        images.get(&image.uri()).cloned()
    }

    pub fn len(&self) -> usize {
        self.images.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ImageRegistry for InMemoryRegistry {
    async fn push(&self, image: &ImageRef, digest: &ImageDigest) -> Result<(), DeckhandError> {
        let uri = image.uri();
        let mut images = self.images.write().unwrap_or_else(|e| e.into_inner());

        match images.get(&uri) {
            Some(existing) if existing == digest => {
                info!("{} already pushed ({})", uri, digest);
                Ok(())
            }
            Some(existing) => Err(DeckhandError::PublishError(format!(
                "tag {} is immutable: already points at {}, refusing {}",
                uri, existing, digest
            ))),
            None => {
                info!("Pushed {} ({})", uri, digest);
                images.insert(uri, digest.clone());
                Ok(())
            }
        }
    }

    async fn contains(&self, image: &ImageRef) -> Result<bool, DeckhandError> {
        Ok(self.digest(image).is_some())
    }
}
