//! Docker CLI image builder

use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::process;
use crate::deploy::ImageBuilder;
use crate::errors::DeckhandError;
use crate::models::image::{ImageDigest, ImageRef};

/// Drives the local `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    dockerfile: PathBuf,
    context_dir: PathBuf,
}

impl DockerCli {
    pub fn new(dockerfile: impl Into<PathBuf>, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "docker".to_string(),
            dockerfile: dockerfile.into(),
            context_dir: context_dir.into(),
        }
    }

    /// Use a different docker-compatible binary (e.g. `podman`)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    /// `docker login --password-stdin`; the password never appears in argv
    pub async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<(), DeckhandError> {
        debug!("Logging in to registry {}", registry);
        let mut cmd = self.command();
        cmd.args(["login", "--username", username, "--password-stdin", registry]);

        process::run(
            cmd,
            "docker login",
            Some(password.expose_secret().as_bytes()),
        )
        .await
        .map_err(DeckhandError::PublishError)?;
        Ok(())
    }

    /// `docker push <image>`
    pub async fn push(&self, image: &ImageRef) -> Result<(), DeckhandError> {
        let uri = image.uri();
        info!("Pushing image: {}", uri);
        let mut cmd = self.command();
        cmd.args(["push", &uri]);
        process::run(cmd, "docker push", None)
            .await
            .map_err(DeckhandError::PublishError)?;
        Ok(())
    }

    /// Local image id of `image`
    pub async fn image_id(&self, image: &ImageRef) -> Result<ImageDigest, DeckhandError> {
        let uri = image.uri();
        let mut cmd = self.command();
        cmd.args(["image", "inspect", "--format", "{{.Id}}", &uri]);
        let output = process::run(cmd, "docker image inspect", None)
            .await
            .map_err(DeckhandError::BuildError)?;

        if output.stdout.is_empty() {
            return Err(DeckhandError::BuildError(format!(
                "docker returned no image id for {}",
                uri
            )));
        }
        Ok(ImageDigest::from_sha256_hex(&output.stdout))
    }
}

#[async_trait]
impl ImageBuilder for DockerCli {
    async fn build(&self, image: &ImageRef) -> Result<ImageDigest, DeckhandError> {
        let uri = image.uri();
        info!("Building image: {}", uri);

        let mut cmd = self.command();
        cmd.arg("build")
            .arg("--tag")
            .arg(&uri)
            .arg("--file")
            .arg(&self.dockerfile)
            .arg(&self.context_dir);

        process::run(cmd, "docker build", None)
            .await
            .map_err(DeckhandError::BuildError)?;

        let digest = self.image_id(image).await?;
        info!("Built {} ({})", uri, digest);
        Ok(digest)
    }
}
