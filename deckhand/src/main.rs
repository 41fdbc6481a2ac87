//! Deckhand - Entry Point
//!
//! One binary for every role: the backend, the reverse proxy in front of
//! it, both together as the container entrypoint, a health-checked load
//! balancer, and the release pipeline that rolls new images out.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info};

use deckhand::app::options::AppOptions;
use deckhand::app::run::run;
use deckhand::balancer::group::TargetGroup;
use deckhand::balancer::probe::{HealthCheckConfig, HttpProber, Prober};
use deckhand::deploy::docker::DockerCli;
use deckhand::deploy::ecs::{AwsCli, EcrRegistry};
use deckhand::errors::DeckhandError;
use deckhand::local::builder::ContextDigestBuilder;
use deckhand::local::cluster::LocalCluster;
use deckhand::local::launcher::InProcessLauncher;
use deckhand::local::registry::InMemoryRegistry;
use deckhand::logs::{init_logging, LogOptions};
use deckhand::models::pipeline::{PipelineRun, TriggerEvent};
use deckhand::pipeline::executor::{Pipeline, PipelineTarget};
use deckhand::pipeline::inputs::{PipelineInputs, ECR_REGISTRY, ECR_REPOSITORY};
use deckhand::rollout::policy::RolloutPolicy;
use deckhand::storage::settings::{PipelineBackend, Settings};
use deckhand::utils::version_info;

const LOCAL_CLUSTER: &str = "local";
const LOCAL_REGISTRY: &str = "registry.local";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let mut settings = match Settings::load(cli_args.get("config").map(PathBuf::from)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings: {e}");
            std::process::exit(2);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    let mode = cli_args
        .get("mode")
        .cloned()
        .unwrap_or_else(|| "supervise".to_string());
    if let Err(e) = apply_overrides(&mut settings, &mode, &cli_args) {
        error!("{e}");
        std::process::exit(2);
    }

    let result = match mode.as_str() {
        "backend" | "proxy" | "supervise" | "balancer" => serve(&mode, &settings).await,
        "pipeline" => match settings.pipeline.backend {
            PipelineBackend::Aws => release(&settings, &cli_args).await,
            PipelineBackend::Local => simulate(&settings, &cli_args).await,
        },
        "simulate" => simulate(&settings, &cli_args).await,
        "render" => render(&settings, &cli_args).await,
        other => Err(DeckhandError::ConfigError(format!(
            "unknown mode '{}' (expected backend, proxy, supervise, balancer, pipeline, simulate or render)",
            other
        ))),
    };

    if let Err(e) = result {
        error!("deckhand --mode={} failed: {e}", mode);
        std::process::exit(1);
    }
}

/// Command-line flags win over the settings file
fn apply_overrides(
    settings: &mut Settings,
    mode: &str,
    cli_args: &HashMap<String, String>,
) -> Result<(), DeckhandError> {
    if let Some(port) = cli_args.get("port") {
        let port: u16 = port
            .parse()
            .map_err(|_| DeckhandError::ConfigError(format!("invalid --port '{}'", port)))?;
        match mode {
            "backend" => settings.backend.port = port,
            "balancer" => settings.balancer.port = port,
            _ => settings.proxy.port = port,
        }
    }
    if let Some(upstream) = cli_args.get("upstream") {
        settings.proxy.upstream_url = upstream.clone();
    }
    if let Some(targets) = cli_args.get("targets") {
        settings.balancer.targets = targets
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(())
}

// ================================= SERVERS ====================================== //

async fn serve(mode: &str, settings: &Settings) -> Result<(), DeckhandError> {
    let options = AppOptions {
        enable_backend: matches!(mode, "backend" | "supervise"),
        enable_proxy: matches!(mode, "proxy" | "supervise"),
        enable_balancer: mode == "balancer",
        ..AppOptions::from_settings(settings)
    };

    info!("Running deckhand in {} mode", mode);
    run(options, await_shutdown_signal()).await
}

// ================================= PIPELINE ===================================== //

fn trigger(cli_args: &HashMap<String, String>) -> Result<TriggerEvent, DeckhandError> {
    let commit = cli_args
        .get("commit")
        .cloned()
        .or_else(|| env::var("GITHUB_SHA").ok())
        .ok_or_else(|| {
            DeckhandError::ConfigError("no commit given (--commit= or GITHUB_SHA)".to_string())
        })?;
    let branch = cli_args
        .get("branch")
        .cloned()
        .or_else(|| env::var("GITHUB_REF_NAME").ok())
        .unwrap_or_else(|| "main".to_string());

    let mut trigger = TriggerEvent::push(commit, branch);
    trigger.repository = env::var("GITHUB_REPOSITORY").ok();
    Ok(trigger)
}

/// Release against ECR and ECS through the docker and aws CLIs
async fn release(
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), DeckhandError> {
    let trigger = trigger(cli_args)?;
    let inputs = PipelineInputs::from_env()?;

    let docker = DockerCli::new(&settings.pipeline.dockerfile, &settings.pipeline.context_dir);
    let aws = AwsCli::new(&inputs.region, inputs.credentials.clone());
    let target = PipelineTarget {
        registry: inputs.registry.clone(),
        repository: inputs.repository.clone(),
        cluster: inputs.cluster.clone(),
        service: inputs.service.clone(),
        task_definition_path: PathBuf::from(&inputs.task_definition),
        container_name: inputs.container_name.clone(),
    };

    let aws = Arc::new(aws);
    let pipeline = Pipeline::new(
        target,
        Arc::new(docker.clone()),
        Arc::new(EcrRegistry::new(aws.as_ref().clone(), docker)),
        aws.clone(),
        aws,
    );

    let run = pipeline.run(trigger).await;
    report(&run)
}

/// Run the pipeline against an in-process registry and cluster
async fn simulate(
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), DeckhandError> {
    let trigger = trigger(cli_args)?;
    settings.validate()?;

    let config = HealthCheckConfig::from_settings(&settings.health_check)?;
    let prober: Arc<dyn Prober> = Arc::new(HttpProber::new(&config)?);
    let group = Arc::new(TargetGroup::new(config));
    let launcher = Arc::new(InProcessLauncher::new(
        &settings.backend.greeting,
        settings.proxy.clone(),
    ));
    let cluster = Arc::new(LocalCluster::new(
        LOCAL_CLUSTER,
        RolloutPolicy::from_settings(&settings.rollout)?,
        group.clone(),
        launcher.clone(),
        prober,
    ));
    let service = settings.pipeline.container_name.clone();
    cluster.create_service(&service)?;

    let target = PipelineTarget {
        registry: LOCAL_REGISTRY.to_string(),
        repository: service.clone(),
        cluster: LOCAL_CLUSTER.to_string(),
        service: service.clone(),
        task_definition_path: PathBuf::from(&settings.pipeline.task_definition_path),
        container_name: settings.pipeline.container_name.clone(),
    };
    let pipeline = Pipeline::new(
        target,
        Arc::new(ContextDigestBuilder::new(&settings.pipeline.context_dir)),
        Arc::new(InMemoryRegistry::new()),
        cluster.clone(),
        cluster.clone(),
    );

    let run = pipeline.run(trigger).await;
    if run.is_success() {
        if let Some(url) = group.next_target() {
            match reqwest::get(&url).await {
                Ok(response) => {
                    let body = response.text().await.unwrap_or_default();
                    println!("{} {} -> {}", "GET".bold(), url, body.trim());
                }
                Err(e) => error!("Failed to reach {}: {}", url, e),
            }
        }
    }

    cluster.shutdown().await;
    launcher.stop_all().await;
    report(&run)
}

/// Print the task definition a commit would register
async fn render(
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), DeckhandError> {
    let trigger = trigger(cli_args)?;
    let target = PipelineTarget {
        registry: env::var(ECR_REGISTRY).unwrap_or_default(),
        repository: env::var(ECR_REPOSITORY)
            .unwrap_or_else(|_| settings.pipeline.container_name.clone()),
        cluster: String::new(),
        service: String::new(),
        task_definition_path: PathBuf::from(&settings.pipeline.task_definition_path),
        container_name: settings.pipeline.container_name.clone(),
    };

    let image = target.image(&trigger.commit_sha)?;
    let definition = target.render(&image).await?;
    println!("{}", definition.to_json()?);
    Ok(())
}

fn report(run: &PipelineRun) -> Result<(), DeckhandError> {
    let state = if run.is_success() {
        run.state.to_string().green().bold()
    } else {
        run.state.to_string().red().bold()
    };
    println!("{} {} ({})", "Pipeline run".bold(), run.id, state);
    println!("  commit:   {}@{}", run.trigger.branch, run.trigger.commit_sha);
    if let Some(image) = &run.image {
        println!("  image:    {}", image);
    }
    if let Some(digest) = &run.digest {
        println!("  digest:   {}", digest);
    }
    if let Some(revision) = &run.revision {
        println!("  revision: {}", revision);
    }
    if let (Some(stage), Some(err)) = (&run.failed_stage, &run.error) {
        println!("  {} during {}: {}", "failed".red(), stage, err);
    }

    run.outcome()
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
