//! Pipeline executor: build, push, register, update, wait

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::deploy::{ImageBuilder, ImageRegistry, ServiceDeployer, TaskDefinitionRegistry};
use crate::errors::DeckhandError;
use crate::filesys::file::File;
use crate::models::image::{ImageRef, ImageTag};
use crate::models::pipeline::{PipelineRun, TriggerEvent};
use crate::models::task_definition::TaskDefinition;
use crate::pipeline::fsm::{PipelineEvent, PipelineFsm};

/// Where a pipeline publishes and deploys
#[derive(Debug, Clone)]
pub struct PipelineTarget {
    pub registry: String,
    pub repository: String,
    pub cluster: String,
    pub service: String,
    pub task_definition_path: PathBuf,
    pub container_name: String,
}

impl PipelineTarget {
    /// Image reference for a commit
    pub fn image(&self, commit_sha: &str) -> Result<ImageRef, DeckhandError> {
        let tag = ImageTag::from_commit(commit_sha)?;
        Ok(ImageRef::new(&self.registry, &self.repository, tag))
    }

    /// Template with the container's image pointed at `image`
    pub async fn render(&self, image: &ImageRef) -> Result<TaskDefinition, DeckhandError> {
        let template = File::new(&self.task_definition_path).read_string().await?;
        let rendered =
            TaskDefinition::from_json(&template)?.with_image(&self.container_name, &image.uri())?;
        rendered.validate()?;
        Ok(rendered)
    }
}

/// Release pipeline over pluggable providers
pub struct Pipeline {
    target: PipelineTarget,
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn ImageRegistry>,
    task_definitions: Arc<dyn TaskDefinitionRegistry>,
    deployer: Arc<dyn ServiceDeployer>,
    branch_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(
        target: PipelineTarget,
        builder: Arc<dyn ImageBuilder>,
        registry: Arc<dyn ImageRegistry>,
        task_definitions: Arc<dyn TaskDefinitionRegistry>,
        deployer: Arc<dyn ServiceDeployer>,
    ) -> Self {
        Self {
            target,
            builder,
            registry,
            task_definitions,
            deployer,
            branch_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn target(&self) -> &PipelineTarget {
        &self.target
    }

    fn branch_lock(&self, branch: &str) -> Arc<Mutex<()>> {
        let mut locks = self.branch_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(branch.to_string()).or_default().clone()
    }

    /// Forget branch locks no run holds or waits on
    fn prune_branch_locks(&self) {
        let mut locks = self.branch_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Branches with a run in progress or queued
    pub fn active_branches(&self) -> usize {
        self.branch_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run the pipeline for one trigger. Runs on the same branch queue behind
    /// each other; any failed stage stops the run and is reported in the
    /// returned `PipelineRun` rather than as an `Err`.
    pub async fn run(&self, trigger: TriggerEvent) -> PipelineRun {
        let lock = self.branch_lock(&trigger.branch);
        let run = {
            let _guard = lock.lock().await;
            self.run_locked(trigger).await
        };
        drop(lock);
        self.prune_branch_locks();
        run
    }

    async fn run_locked(&self, trigger: TriggerEvent) -> PipelineRun {
        let mut run = PipelineRun::new(trigger);
        let mut fsm = PipelineFsm::new();
        info!(
            "Pipeline run {} started for {}@{}",
            run.id, run.trigger.branch, run.trigger.commit_sha
        );

        if let Err(e) = self.execute(&mut fsm, &mut run).await {
            error!("Pipeline run {} failed in {}: {}", run.id, fsm.state(), e);
            if let Err(transition) = fsm.process(PipelineEvent::Failed(e.to_string())) {
                error!("Pipeline run {}: {}", run.id, transition);
            }
            run.failed_stage = fsm.failed_stage();
            run.error = Some(fsm.error().map(str::to_string).unwrap_or_else(|| e.to_string()));
        }

        run.state = fsm.state();
        run.finished_at = Some(Utc::now());
        info!("Pipeline run {} finished: {}", run.id, run.state);
        run
    }

    async fn execute(&self, fsm: &mut PipelineFsm, run: &mut PipelineRun) -> Result<(), DeckhandError> {
        // 1. Build
        let image = self.target.image(&run.trigger.commit_sha)?;
        run.image = Some(image.clone());
        let digest = self.builder.build(&image).await?;
        run.digest = Some(digest.clone());
        fsm.process(PipelineEvent::Built)?;

        // 2. Push
        self.registry.push(&image, &digest).await?;
        fsm.process(PipelineEvent::Pushed)?;

        // 3. Register
        let definition = self.target.render(&image).await?;
        if !self.registry.contains(&image).await? {
            return Err(DeckhandError::RegistrationError(format!(
                "{} is not in the registry",
                image
            )));
        }
        let revision = self.task_definitions.register(&definition).await?;
        run.revision = Some(revision.id());
        fsm.process(PipelineEvent::Registered)?;

        // 4. Update service
        self.deployer
            .update_service(&self.target.cluster, &self.target.service, &revision)
            .await?;
        fsm.process(PipelineEvent::ServiceUpdated)?;

        // 5. Wait for the rollout
        self.deployer
            .wait_stable(&self.target.cluster, &self.target.service)
            .await?;
        fsm.process(PipelineEvent::Stable)?;

        Ok(())
    }
}
