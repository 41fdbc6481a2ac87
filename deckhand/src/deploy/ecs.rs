//! AWS CLI backed registry (ECR) and orchestration (ECS)

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use crate::deploy::docker::DockerCli;
use crate::deploy::process;
use crate::deploy::{ImageRegistry, ServiceDeployer, TaskDefinitionRegistry};
use crate::errors::DeckhandError;
use crate::models::image::{ImageDigest, ImageRef};
use crate::models::task_definition::{TaskDefinition, TaskDefinitionRevision};

/// Static access key pair handed to the `aws` child process
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: SecretString,
    pub secret_access_key: SecretString,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AwsCredentials([REDACTED])")
    }
}

/// Drives the `aws` binary
#[derive(Debug, Clone)]
pub struct AwsCli {
    region: String,
    credentials: AwsCredentials,
}

impl AwsCli {
    pub fn new(region: impl Into<String>, credentials: AwsCredentials) -> Self {
        Self {
            region: region.into(),
            credentials,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("aws");
        cmd.env("AWS_ACCESS_KEY_ID", self.credentials.access_key_id.expose_secret())
            .env(
                "AWS_SECRET_ACCESS_KEY",
                self.credentials.secret_access_key.expose_secret(),
            )
            .env("AWS_REGION", &self.region)
            .env("AWS_PAGER", "")
            .args(["--region", &self.region, "--output", "json"]);
        cmd
    }

    /// Short-lived password for `docker login` against ECR
    pub async fn ecr_login_password(&self) -> Result<SecretString, DeckhandError> {
        let mut cmd = self.command();
        cmd.args(["ecr", "get-login-password"]);
        let output = process::run(cmd, "aws ecr get-login-password", None)
            .await
            .map_err(DeckhandError::PublishError)?;
        Ok(SecretString::from(output.stdout))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterOutput {
    task_definition: RegisteredTaskDefinition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredTaskDefinition {
    family: String,
    revision: u32,
}

#[async_trait]
impl TaskDefinitionRegistry for AwsCli {
    async fn register(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRevision, DeckhandError> {
        let input = serde_json::to_string(definition)?;
        let mut cmd = self.command();
        cmd.args(["ecs", "register-task-definition", "--cli-input-json", &input]);

        let output = process::run(cmd, "aws ecs register-task-definition", None)
            .await
            .map_err(DeckhandError::RegistrationError)?;
        let parsed: RegisterOutput = serde_json::from_str(&output.stdout).map_err(|e| {
            DeckhandError::RegistrationError(format!("unexpected register output: {}", e))
        })?;

        let revision = TaskDefinitionRevision {
            family: parsed.task_definition.family,
            revision: parsed.task_definition.revision,
            definition: definition.clone(),
            registered_at: Utc::now(),
        };
        info!("Registered task definition {}", revision.id());
        Ok(revision)
    }
}

#[async_trait]
impl ServiceDeployer for AwsCli {
    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        revision: &TaskDefinitionRevision,
    ) -> Result<(), DeckhandError> {
        let task_definition = revision.id();
        let mut cmd = self.command();
        cmd.args([
            "ecs",
            "update-service",
            "--cluster",
            cluster,
            "--service",
            service,
            "--task-definition",
            &task_definition,
            "--force-new-deployment",
        ]);

        process::run(cmd, "aws ecs update-service", None)
            .await
            .map_err(DeckhandError::RegistrationError)?;
        info!("Service {}/{} now targets {}", cluster, service, task_definition);
        Ok(())
    }

    async fn wait_stable(&self, cluster: &str, service: &str) -> Result<(), DeckhandError> {
        info!("Waiting for {}/{} to stabilize...", cluster, service);
        let mut cmd = self.command();
        cmd.args([
            "ecs",
            "wait",
            "services-stable",
            "--cluster",
            cluster,
            "--services",
            service,
        ]);

        // The waiter gives up on its own after a bounded number of polls
        process::run(cmd, "aws ecs wait services-stable", None)
            .await
            .map_err(DeckhandError::RolloutError)?;
        Ok(())
    }
}

/// ECR repository reached through docker + aws CLIs
#[derive(Debug, Clone)]
pub struct EcrRegistry {
    aws: AwsCli,
    docker: DockerCli,
}

impl EcrRegistry {
    pub fn new(aws: AwsCli, docker: DockerCli) -> Self {
        Self { aws, docker }
    }

    /// Config digest of the image stored under the tag, which matches the
    /// local image id docker reports after a build
    async fn remote_config_digest(
        &self,
        image: &ImageRef,
    ) -> Result<Option<ImageDigest>, DeckhandError> {
        let image_ids = format!("imageTag={}", image.tag);
        let mut cmd = self.aws.command();
        cmd.args([
            "ecr",
            "batch-get-image",
            "--repository-name",
            &image.repository,
            "--image-ids",
            &image_ids,
            "--output",
            "json",
        ]);

        let output = process::run(cmd, "aws ecr batch-get-image", None)
            .await
            .map_err(DeckhandError::PublishError)?;
        parse_config_digest(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct BatchGetImageOutput {
    #[serde(default)]
    images: Vec<StoredImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredImage {
    image_manifest: String,
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    config: ManifestConfig,
}

#[derive(Debug, Deserialize)]
struct ManifestConfig {
    digest: String,
}

fn parse_config_digest(raw: &str) -> Result<Option<ImageDigest>, DeckhandError> {
    let output: BatchGetImageOutput = serde_json::from_str(raw)?;
    let Some(stored) = output.images.first() else {
        return Ok(None);
    };
    let manifest: ImageManifest = serde_json::from_str(&stored.image_manifest)?;
    Ok(Some(ImageDigest::from_sha256_hex(&manifest.config.digest)))
}

#[async_trait]
impl ImageRegistry for EcrRegistry {
    async fn push(&self, image: &ImageRef, digest: &ImageDigest) -> Result<(), DeckhandError> {
        if let Some(existing) = self.remote_config_digest(image).await? {
            if existing != *digest {
                return Err(DeckhandError::PublishError(format!(
                    "{} already holds {}, refusing to overwrite with {}",
                    image, existing, digest
                )));
            }
            info!("{} already in registry, skipping push ({})", image, digest);
            return Ok(());
        }

        let password = self.aws.ecr_login_password().await?;
        self.docker.login(&image.registry, "AWS", &password).await?;
        self.docker.push(image).await
    }

    async fn contains(&self, image: &ImageRef) -> Result<bool, DeckhandError> {
        let image_ids = format!("imageTag={}", image.tag);
        let mut cmd = self.aws.command();
        cmd.args([
            "ecr",
            "describe-images",
            "--repository-name",
            &image.repository,
            "--image-ids",
            &image_ids,
        ]);

        match process::run(cmd, "aws ecr describe-images", None).await {
            Ok(_) => Ok(true),
            Err(e) if e.contains("ImageNotFoundException") => Ok(false),
            Err(e) => Err(DeckhandError::PublishError(e)),
        }
    }
}
