//! sandcast - build, tag and verify sandbox templates
//!
//! ## Commands
//!
//! - `list`: templates in the catalog with their versions
//! - `show`: effective template spec, checks and digest as JSON
//! - `build`: build a template on the control plane, streaming logs
//! - `tag`: point release tags at an existing build
//! - `verify`: provision a sandbox and run the template's checks

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sandcast_core::domain::ResourceHints;
use sandcast_core::{BuildConfig, LocalShellProvider, ReleaseTagger, TemplateCatalog, VerifyConfig};
use sandcast_pipeline::{verify_template, BuildExecutor, VerificationReport};
use sandcast_state::{
    BuildEvent, ControlPlaneConfig, FsVersionStore, HttpControlPlane, SandboxProvider,
    VersionStore,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "sandcast")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, tag and verify sandbox templates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding one subdirectory per template
    #[arg(
        long,
        global = true,
        env = "SANDCAST_TEMPLATES_DIR",
        default_value = "templates"
    )]
    templates_dir: PathBuf,

    /// Control plane base URL
    #[arg(
        long,
        global = true,
        env = "SANDCAST_API_URL",
        default_value = "http://localhost:8080"
    )]
    api_url: String,

    /// Control plane API key
    #[arg(long, global = true, env = "SANDCAST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List templates and their versions
    List,

    /// Show a template's effective spec, checks and digest
    Show {
        /// Template name
        name: String,
    },

    /// Build a template
    Build {
        /// Template name
        name: String,

        /// Build `name:TAG` instead of `name`
        #[arg(long, env = "SANDCAST_BUILD_TAG")]
        tag: Option<String>,

        /// vCPUs, used when the template does not set one
        #[arg(long)]
        cpu_count: Option<u32>,

        /// Memory in MiB, used when the template does not set one
        #[arg(long)]
        memory_mb: Option<u32>,
    },

    /// Assign `vMAJOR.MINOR.PATCH` and `lts` to an existing build
    Tag {
        /// Template name
        name: String,

        /// Tag of the build that receives the release tags
        #[arg(long, env = "SANDCAST_SOURCE_TAG")]
        source_tag: Option<String>,
    },

    /// Provision a sandbox from a template and run its checks
    Verify {
        /// Template name
        name: String,

        /// Provision from `name:TAG` instead of `name`
        #[arg(long, env = "SANDCAST_TEMPLATE_TAG")]
        tag: Option<String>,

        /// Sandbox lifetime in milliseconds
        #[arg(long, default_value_t = sandcast_core::DEFAULT_VERIFY_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Run the checks in a local shell instead of a remote sandbox
        #[arg(long)]
        local: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return;
        }
        Err(e) => {
            let rendered = e.render().to_string();
            eprintln!("{}", rendered.lines().next().unwrap_or("error: invalid usage"));
            std::process::exit(1);
        }
    };

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sandcast_core::init_tracing(cli.json, level);

    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let catalog = TemplateCatalog::new(&cli.templates_dir);

    match cli.command {
        Commands::List => cmd_list(&catalog).await,
        Commands::Show { ref name } => cmd_show(&catalog, name).await,
        Commands::Build {
            ref name,
            ref tag,
            cpu_count,
            memory_mb,
        } => {
            let config = BuildConfig {
                tag_override: tag.clone(),
                cpu_count,
                memory_mb,
            };
            cmd_build(&cli, &catalog, name, &config).await
        }
        Commands::Tag {
            ref name,
            ref source_tag,
        } => cmd_tag(&cli, name, source_tag.as_deref()).await,
        Commands::Verify {
            ref name,
            ref tag,
            timeout_ms,
            local,
        } => {
            let config = VerifyConfig {
                template_tag: tag.clone(),
                timeout_ms,
            };
            cmd_verify(&cli, &catalog, name, &config, local).await
        }
    }
}

fn control_plane(cli: &Cli) -> Result<HttpControlPlane> {
    let mut config = ControlPlaneConfig::new(&cli.api_url);
    if let Some(key) = &cli.api_key {
        config = config.with_api_key(key);
    }
    HttpControlPlane::new(config).context("Failed to create control plane client")
}

/// List templates with their versions
async fn cmd_list(catalog: &TemplateCatalog) -> Result<()> {
    let names = catalog
        .list()
        .await
        .with_context(|| format!("Failed to read {}", catalog.root().display()))?;
    if names.is_empty() {
        println!("No templates found in {}", catalog.root().display());
        return Ok(());
    }

    let versions = FsVersionStore::new(catalog.root());
    for name in names {
        let version = match versions.read_version(&name).await {
            Ok(raw) => raw.trim().to_string(),
            Err(_) => "-".to_string(),
        };
        println!("{:<16} {}", name, version);
    }
    Ok(())
}

/// Print the effective spec as JSON
async fn cmd_show(catalog: &TemplateCatalog, name: &str) -> Result<()> {
    let loaded = catalog.load(name).await?;
    let effective = loaded
        .spec
        .with_default_hints(ResourceHints::default())?;
    let version = FsVersionStore::new(catalog.root())
        .read_version(name)
        .await
        .ok()
        .map(|v| v.trim().to_string());

    let doc = serde_json::json!({
        "name": effective.name(),
        "version": version,
        "digest": effective.digest(),
        "base_image": effective.base_image(),
        "cpu_count": effective.hints().cpu_count_or_default(),
        "memory_mb": effective.hints().memory_mb_or_default(),
        "steps": effective.steps(),
        "checks": loaded.checks,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Build a template on the control plane
async fn cmd_build(
    cli: &Cli,
    catalog: &TemplateCatalog,
    name: &str,
    config: &BuildConfig,
) -> Result<()> {
    let loaded = catalog.load(name).await?;
    let executor = BuildExecutor::new(control_plane(cli)?);

    let mut print_log = |event: &BuildEvent| match event {
        BuildEvent::StepStarted { index } => {
            if let Some(step) = loaded.spec.steps().get(*index) {
                println!("[{}] {}", index, step.describe());
            }
        }
        BuildEvent::Log(record) => println!("    {}", record.message),
        _ => {}
    };

    let result = executor
        .execute(&loaded.spec, config, &mut print_log)
        .await?
        .ensure_success()?;

    let artifact = result
        .artifact_ref
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_default();
    println!(
        "Built {} in {}ms ({})",
        result.target, result.duration_ms, artifact
    );
    Ok(())
}

/// Assign release tags from the version file
async fn cmd_tag(cli: &Cli, name: &str, source_tag: Option<&str>) -> Result<()> {
    let tagger = ReleaseTagger::new(
        control_plane(cli)?,
        FsVersionStore::new(&cli.templates_dir),
    );
    let outcome = tagger
        .tag_release(name, source_tag)
        .await
        .with_context(|| format!("Failed to tag {}", name))?;

    println!(
        "Tagged {} ({}) as {}",
        outcome.assignment.target, outcome.artifact, outcome.assignment.tags
    );
    Ok(())
}

/// Provision a sandbox and run the template's checks
async fn cmd_verify(
    cli: &Cli,
    catalog: &TemplateCatalog,
    name: &str,
    config: &VerifyConfig,
    local: bool,
) -> Result<()> {
    let loaded = catalog.load(name).await?;
    let provider: Arc<dyn SandboxProvider> = if local {
        Arc::new(LocalShellProvider::new())
    } else {
        Arc::new(control_plane(cli)?)
    };

    let report = verify_template(provider, loaded.name(), &loaded.checks, config).await?;
    print_report(&report);

    if !report.passed {
        bail!("{}", report.summary());
    }
    Ok(())
}

fn print_report(report: &VerificationReport) {
    for check in &report.checks {
        let status = if check.passed { "PASS" } else { "FAIL" };
        println!("{} {} ({}ms)", status, check.label, check.duration_ms);
    }
    if let Some(err) = &report.teardown_error {
        println!("teardown: {}", err);
    }
    if report.passed {
        println!("All checks passed.");
    }
}
