/// EKS ArgoCD bootstrap
use crate::Error::*;
use clap::{Parser, Subcommand};
use eks_argo::config;
use eks_argo::contracts::Registry;
use eks_argo::publisher::{self, LifecycleRequest, LifecycleResponse, Publisher, RequestType};
use eks_argo::repository::{CodeCommitRepository, MemoryRepository, Repository};
use eks_argo::resolver::Resolver;
use eks_argo::{chart, contracts, resolver};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable holding the revision reference of the cluster environment.
const REV_REF_ENV: &str = "ODMD_REV_REF";

/// Render and publish the ArgoCD app-of-apps of an EKS cluster environment.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Revision reference naming the cluster environment, e.g. `b..odmdSbxUsw1Gyang`.
    /// Defaults to the ODMD_REV_REF environment variable.
    #[arg(long)]
    rev_ref: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve ArgoCD projects and applications for this cluster and render them into the staging directory.
    Synth,
    /// Handle one custom resource lifecycle event and print the response.
    Publish {
        /// JSON lifecycle event, or `-` to read it from standard input.
        #[arg(long)]
        event: String,
        /// Commit into an in-memory repository instead of CodeCommit.
        #[arg(long)]
        dry_run: bool,
        /// Also PUT the response to the event's ResponseURL.
        #[arg(long)]
        respond: bool,
    },
    /// Render the manifests, then publish the root chart into the manifest repository. Implies the `synth` command.
    Push {
        /// Commit into an in-memory repository instead of CodeCommit.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("filesystem error: {0}")]
    FilesystemError(#[from] std::io::Error),

    #[error("configuration file: {0}")]
    ConfigParse(#[from] config::file::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::runtime::Error),

    #[error("no revision reference, pass --rev-ref or set {REV_REF_ENV}")]
    MissingRevisionReference,

    #[error("contracts: {0}")]
    Contracts(#[from] contracts::Error),

    #[error("resolve: {0}")]
    Resolve(#[from] resolver::Error),

    #[error("synth: {0}")]
    Synth(#[from] chart::Error),

    #[error("publish: {0}")]
    Publish(#[from] publisher::Error),

    #[error("lifecycle event: {0}")]
    Event(#[from] serde_json::Error),
}

/// Read configuration file from disk and merge it with the
/// `default.toml` built-in config.
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists in the
/// working directory. If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::file::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "eks-argo.toml";

    let config_file = match &args.config {
        None => {
            if std::fs::metadata(DEFAULT_CONFIG_FILE)
                .map(|metadata| metadata.is_file())
                .unwrap_or(false)
            {
                Some(DEFAULT_CONFIG_FILE.to_string())
            } else {
                None
            }
        }
        Some(c) => Some(c.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        debug!("Using configuration file {config_file}");
        config::file::File::default_with_user_config_file(&config_file)?
    } else {
        config::file::File::default()
    })
}

/// Region from the deployment environment, if it overrides the configuration.
fn region_override() -> Option<String> {
    std::env::var("CDK_DEFAULT_REGION").ok()
}

fn runtime_config(args: &Cli, cfg_file: &config::file::File) -> Result<config::runtime::Config, Error> {
    let rev_ref = args
        .rev_ref
        .clone()
        .or_else(|| std::env::var(REV_REF_ENV).ok())
        .ok_or(MissingRevisionReference)?;
    Ok(config::runtime::Config::new(cfg_file, &rev_ref, region_override())?)
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err.to_string());
            std::process::exit(1)
        }
    }
}

async fn run() -> Result<(), Error> {
    env_logger::init();

    let args = Cli::parse();
    let cfg_file = read_config(&args)?;

    match &args.command {
        Commands::Synth => {
            let cfg = runtime_config(&args, &cfg_file)?;
            for manifest in synth(&cfg)? {
                println!("{}", manifest.display());
            }
            Ok(())
        }
        Commands::Publish { event, dry_run, respond } => {
            let request: LifecycleRequest = serde_json::from_str(&read_event(event)?)?;
            let region = region_override().unwrap_or_else(|| cfg_file.region.clone());
            let publisher = Publisher::new(repository(*dry_run, &region).await);
            handle_event(&publisher, &request, *respond).await
        }
        Commands::Push { dry_run } => {
            let cfg = runtime_config(&args, &cfg_file)?;
            synth(&cfg)?;
            let request = push_request(&cfg)?;
            let publisher = Publisher::new(repository(*dry_run, &cfg.region).await);
            handle_event(&publisher, &request, false).await
        }
    }
}

/// Resolve the registry for the configured cluster and render the root chart.
fn synth(cfg: &config::runtime::Config) -> Result<Vec<PathBuf>, Error> {
    info!("Cluster environment {} ({})", cfg.enver_name, cfg.cluster);

    let registry = Registry::parse_file(&cfg.contracts)?;
    info!("{} builds in contracts registry {}", registry.builds().len(), cfg.contracts);

    let resolution = Resolver::new().resolve(&registry, &cfg.cluster, &cfg.gitops_source())?;
    info!(
        "Resolved {} projects and {} applications",
        resolution.projects.len(),
        resolution.applications.len()
    );

    let chart = cfg.app_of_apps.chart(&resolution);
    let manifests = chart::synth(&[chart], &cfg.staging_dir)?;
    info!("Rendered {} charts into {}", manifests.len(), cfg.staging_dir.display());
    Ok(manifests)
}

/// The lifecycle event the provisioning system sends when the root manifest changes.
fn push_request(cfg: &config::runtime::Config) -> Result<LifecycleRequest, Error> {
    let file_content = std::fs::read_to_string(cfg.app_of_apps_manifest())?;
    Ok(LifecycleRequest {
        request_type: RequestType::Create,
        response_url: None,
        stack_id: format!("local/{}", cfg.enver_name),
        request_id: chrono::Utc::now().timestamp_millis().to_string(),
        logical_resource_id: "pushManifests".to_string(),
        physical_resource_id: None,
        resource_properties: serde_json::json!({
            "repositoryName": cfg.repository_name,
            "filePath": cfg.app_of_apps.manifest_path(),
            "branch": cfg.branch,
            "fileContent": file_content,
        }),
    })
}

async fn repository(dry_run: bool, region: &str) -> Box<dyn Repository> {
    if dry_run {
        info!("Dry run, committing into an in-memory repository");
        Box::new(MemoryRepository::new())
    } else {
        Box::new(CodeCommitRepository::from_region(region).await)
    }
}

fn read_event(path: &str) -> Result<String, Error> {
    Ok(if path == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    })
}

/// Handle `request`, print the response and optionally deliver it to the provisioning system.
/// A failed publish still produces a FAILED response before the error is returned.
async fn handle_event<R: Repository>(
    handler: &Publisher<R>,
    request: &LifecycleRequest,
    respond: bool,
) -> Result<(), Error> {
    let (response, failure) = match handler.handle(request).await {
        Ok(response) => (response, None),
        Err(err) => (LifecycleResponse::failed(request, err.to_string()), Some(err)),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);

    if respond {
        match &request.response_url {
            Some(url) => publisher::respond(url, &response).await?,
            None => warn!("--respond given, but the event has no ResponseURL"),
        }
    }

    match failure {
        Some(err) => Err(Publish(err)),
        None => Ok(()),
    }
}
