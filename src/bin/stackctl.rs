//! stackctl: deploy, inspect, and tear down the pet-store gateway demo stack
//!
//! Provisioning runs against the local control-plane emulation; state persists
//! under the platform data directory so `deploy` and `teardown` agree across
//! invocations. Tool commands talk to the deployed gateway over JSON-RPC.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use petstore_stack::cloud::local::{default_state_path, LocalControlPlane};
use petstore_stack::config::{self, StackConfig};
use petstore_stack::manifest::{keys, Manifest, ManifestError};
use petstore_stack::mcp::{self, ToolClient};
use petstore_stack::teardown::CONFIRM_TOKEN;
use petstore_stack::{stack, Decommissioner, Provisioner};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stackctl")]
#[command(about = "Provision and tear down the pet store gateway demo stack")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the full stack and write the deployment manifest
    Deploy {
        /// Region to provision into
        #[arg(long, default_value = config::DEFAULT_REGION)]
        region: String,

        /// Account to provision into
        #[arg(long, default_value = config::DEFAULT_ACCOUNT_ID)]
        account_id: String,

        /// Manifest output path
        #[arg(long, default_value = config::DEFAULT_MANIFEST_PATH)]
        manifest: PathBuf,

        /// Control-plane state file (defaults to the platform data directory)
        #[arg(long)]
        control_plane: Option<PathBuf>,

        /// Print the step plan without provisioning anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete everything the manifest records, then the manifest itself
    Teardown {
        /// Manifest path
        #[arg(long, default_value = config::DEFAULT_MANIFEST_PATH)]
        manifest: PathBuf,

        /// Control-plane state file (defaults to the platform data directory)
        #[arg(long)]
        control_plane: Option<PathBuf>,
    },

    /// Print the deployment manifest
    Status {
        /// Manifest path
        #[arg(long, default_value = config::DEFAULT_MANIFEST_PATH)]
        manifest: PathBuf,
    },

    /// Interact with the deployed gateway's tools
    Tools {
        #[command(subcommand)]
        action: ToolsAction,

        /// Manifest path
        #[arg(long, default_value = config::DEFAULT_MANIFEST_PATH)]
        manifest: PathBuf,

        /// Bearer-token file
        #[arg(long, default_value = config::DEFAULT_TOKEN_PATH)]
        token: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ToolsAction {
    /// List every tool the gateway exposes
    List,

    /// Invoke one tool by name
    Call {
        /// Tool name; bare names are namespaced to the demo target
        name: String,

        /// JSON object of tool arguments
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match args.command {
        Command::Deploy {
            region,
            account_id,
            manifest,
            control_plane,
            dry_run,
        } => deploy(region, account_id, manifest, control_plane, dry_run).await,
        Command::Teardown {
            manifest,
            control_plane,
        } => teardown(manifest, control_plane).await,
        Command::Status { manifest } => status(manifest),
        Command::Tools {
            action,
            manifest,
            token,
        } => tools(action, manifest, token).await,
    }
}

fn state_path(control_plane: Option<PathBuf>) -> Result<PathBuf> {
    match control_plane {
        Some(path) => Ok(path),
        None => default_state_path(),
    }
}

async fn deploy(
    region: String,
    account_id: String,
    manifest_path: PathBuf,
    control_plane: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let registry = stack::registry()?;

    if dry_run {
        println!("deployment plan ({} steps):", registry.len());
        for (index, step) in registry.steps().iter().enumerate() {
            println!(
                "  [{}/{}] {:<16} -> {}",
                index + 1,
                registry.len(),
                step.name(),
                step.provides().join(", ")
            );
        }
        return Ok(());
    }

    let mut config = StackConfig::new(account_id, region);
    config.manifest_path = manifest_path;

    let state = state_path(control_plane)?;
    let cloud = LocalControlPlane::load(&state, &config.account_id, &config.region)?;

    let report = Provisioner::new(&cloud, &config).run(&registry).await?;
    report
        .manifest
        .save(&config.manifest_path)
        .context("failed to persist deployment manifest")?;
    info!(path = %config.manifest_path.display(), "Manifest written");

    for (name, kind) in &report.outcomes {
        println!("  {name:<16} {}", kind.as_str());
    }
    if let Some(endpoint) = report.manifest.get(keys::REST_API_ENDPOINT) {
        println!("\nAPI endpoint: {endpoint}");
    }
    if let Some(url) = report.manifest.get(keys::GATEWAY_URL) {
        println!("Gateway URL:  {url}");
    }
    Ok(())
}

async fn teardown(manifest_path: PathBuf, control_plane: Option<PathBuf>) -> Result<()> {
    let manifest = match Manifest::load(&manifest_path) {
        Ok(manifest) => manifest,
        // Nothing is provisioned. A clean no-op, not a failure.
        Err(ManifestError::NotFound { path }) => {
            println!("no manifest at {path}, nothing to tear down");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let region = manifest.require(keys::REGION)?;
    let account_id = manifest.require(keys::ACCOUNT_ID)?;
    let mut config = StackConfig::new(account_id, region);
    config.manifest_path = manifest_path;

    println!("This will delete every resource recorded in the manifest.");
    print!("Type '{CONFIRM_TOKEN}' to confirm: ");
    std::io::stdout().flush()?;
    let mut confirmation = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut confirmation)
        .context("failed to read confirmation")?;

    let state = state_path(control_plane)?;
    let cloud = LocalControlPlane::load(&state, &config.account_id, &config.region)?;
    let registry = stack::registry()?;

    let report = Decommissioner::new(&cloud, &config)
        .run(&registry, &manifest, confirmation.trim())
        .await;
    print!("{report}");

    if report.status == petstore_stack::teardown::TeardownStatus::PartiallyClean {
        anyhow::bail!("some resources could not be deleted; re-run teardown to retry");
    }
    Ok(())
}

fn status(manifest_path: PathBuf) -> Result<()> {
    let manifest = Manifest::load(&manifest_path)
        .context("no deployment found; run `stackctl deploy` first")?;
    for (key, value) in manifest.iter() {
        println!("  {key:<20} {value}");
    }
    Ok(())
}

async fn tools(action: ToolsAction, manifest_path: PathBuf, token_path: PathBuf) -> Result<()> {
    let manifest = Manifest::load(&manifest_path)
        .context("no deployment found; run `stackctl deploy` first")?;
    let gateway_url = manifest.require(keys::GATEWAY_URL)?;
    let token = mcp::load_access_token(&token_path)?;
    let client = ToolClient::new(gateway_url, token)?;

    match action {
        ToolsAction::List => {
            let tools = client.list_tools().await?;
            for tool in tools {
                match tool.description {
                    Some(description) => println!("  {:<32} {description}", tool.name),
                    None => println!("  {}", tool.name),
                }
            }
        }
        ToolsAction::Call { name, arguments } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&arguments).context("--arguments is not valid JSON")?;
            let name = if name.contains("___") {
                name
            } else {
                mcp::namespaced_tool(config::TARGET_NAME, &name)
            };
            match client.call_tool(&name, arguments).await {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(message) => anyhow::bail!(message),
            }
        }
    }
    Ok(())
}
