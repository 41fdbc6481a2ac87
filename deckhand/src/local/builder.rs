//! Content-addressed "build" of a context directory

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::ImageBuilder;
use crate::errors::DeckhandError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::image::{ImageDigest, ImageRef};
use crate::utils::sha256_hash;

/// Stands in for `docker build`: the digest is a hash over every file of the
/// build context, so unchanged sources give the same digest.
#[derive(Debug, Clone)]
pub struct ContextDigestBuilder {
    context_dir: PathBuf,
}

impl ContextDigestBuilder {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
        }
    }

    /// One `<path> <sha256>` line per file, sorted by path
    pub async fn manifest(&self) -> Result<String, DeckhandError> {
        let dir = Dir::new(&self.context_dir);
        if !dir.exists().await {
            return Err(DeckhandError::BuildError(format!(
                "build context {} does not exist",
                self.context_dir.display()
            )));
        }

        let mut manifest = String::new();
        for path in dir.walk_files().await? {
            let contents = File::new(&path).read_bytes().await?;
            let relative = path
                .strip_prefix(&self.context_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            manifest.push_str(&format!("{} {}\n", relative, sha256_hash(&contents)));
        }
        Ok(manifest)
    }
}

#[async_trait]
impl ImageBuilder for ContextDigestBuilder {
    async fn build(&self, image: &ImageRef) -> Result<ImageDigest, DeckhandError> {
        let manifest = self.manifest().await?;
        if manifest.is_empty() {
            return Err(DeckhandError::BuildError(format!(
                "build context {} is empty",
                self.context_dir.display()
            )));
        }

        let digest = ImageDigest::from_sha256_hex(&sha256_hash(manifest.as_bytes()));
        info!("Built {} ({})", image, digest);
        Ok(digest)
    }
}
