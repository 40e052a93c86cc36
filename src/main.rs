use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{Level, info};

use restora::banner::{BackendLocation, BannerInfo, print_banner};
use restora::config::{ServiceConfig, Settings};
use restora::consts::{DEFAULT_BIND, default_db_path};
use restora::envelope::ResponseEnvelope;
use restora::invoker::ProcessInvoker;
use restora::request::{BackendKind, VersionField};
use restora::router::RequestRouter;
use restora::server;
use restora::telemetry::init_tracing;
use restora::wire::{GenerateBody, GenerateResponse, RestoreBody, RestoreResponse};

#[derive(Parser)]
#[command(
    name = "restora",
    version,
    about = "Face restoration over CodeFormer, GFPGAN and Ref-LDM."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite settings database (use :memory: for ephemeral)
    #[arg(long, global = true, env = "RESTORA_DB")]
    db: Option<String>,

    /// Per-request invocation timeout in seconds
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value_t = Level::INFO)]
    log_level: Level,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        /// Address to listen on (CodeFormer 8001, Ref-LDM 8002, GFPGAN 8003 by convention)
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,
        /// Serve only these backends (repeatable; default all)
        #[arg(long = "backend", value_parser = parse_kind)]
        backends: Vec<BackendKind>,
        /// Parent directory for per-request output directories
        #[arg(short, long)]
        output_root: Option<PathBuf>,
    },
    /// Restore one image with CodeFormer or GFPGAN and print the result
    Restore {
        #[arg(long, value_parser = parse_kind)]
        backend: BackendKind,
        #[arg(short, long)]
        input: String,
        /// Fidelity weight in [0, 1]
        #[arg(short, long)]
        weight: Option<f64>,
        /// GFPGAN model version (1.3 or 1.4)
        #[arg(long)]
        version: Option<String>,
        /// GFPGAN upscale factor
        #[arg(short, long)]
        upscale: Option<i64>,
        /// Output root directory
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Generate one image with Ref-LDM and print the result
    Generate {
        /// Low-quality input image
        #[arg(long)]
        lq: String,
        /// Reference image (repeatable, at least one)
        #[arg(long = "ref", required = true)]
        refs: Vec<String>,
        #[arg(long)]
        cfg_scale: Option<f64>,
        #[arg(long)]
        ddim_step: Option<i64>,
        #[arg(long)]
        seed: Option<i64>,
        /// Output directory or file path
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting
    Get { key: String },
    /// Store a setting
    Set { key: String, value: String },
    /// Remove a setting, restoring its default
    Unset { key: String },
    /// Print every stored setting
    List,
}

fn parse_kind(s: &str) -> Result<BackendKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.log_level);

    let settings = open_settings(cli.db.as_deref())?;

    match cli.command {
        Command::Config { action } => handle_config(&settings, action),
        Command::Serve {
            bind,
            backends,
            output_root,
        } => {
            let mut config = load_config(&settings, cli.timeout)?;
            if let Some(root) = output_root {
                config.output_root = root;
            }
            handle_serve(config, &bind, &backends).await
        }
        Command::Restore {
            backend,
            input,
            weight,
            version,
            upscale,
            output,
        } => {
            let router = build_router(load_config(&settings, cli.timeout)?)?;
            let body = RestoreBody {
                backend_kind: Some(backend.to_string()),
                input_path: Some(input),
                output_path: output,
                weight,
                version: version.map(VersionField::Text),
                upscale,
            };
            let envelope = router.handle_restore(body).await;
            report::<RestoreResponse>(envelope)
        }
        Command::Generate {
            lq,
            refs,
            cfg_scale,
            ddim_step,
            seed,
            output,
        } => {
            let router = build_router(load_config(&settings, cli.timeout)?)?;
            let body = GenerateBody {
                lq_path: Some(lq),
                ref_paths: Some(refs),
                output_path: output,
                cfg_scale,
                ddim_step,
                seed,
            };
            let envelope = router.handle_generate(body).await;
            report::<GenerateResponse>(envelope)
        }
    }
}

fn open_settings(db: Option<&str>) -> Result<Settings> {
    let path = match db {
        Some(path) => path.to_string(),
        None => {
            let path = default_db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            path.to_string_lossy().into_owned()
        }
    };
    Settings::open(&path)
}

/// Defaults, then persisted settings, then flags.
fn load_config(settings: &Settings, timeout: Option<u64>) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::default();
    config.apply_settings(settings)?;
    if let Some(secs) = timeout {
        config.set("timeout_secs", &secs.to_string())?;
    }
    Ok(config)
}

fn build_router(config: ServiceConfig) -> Result<RequestRouter> {
    let invoker = Arc::new(ProcessInvoker::new(config.max_output_bytes));
    RequestRouter::new(config, invoker).context("failed to set up remote backends")
}

async fn handle_serve(config: ServiceConfig, bind: &str, backends: &[BackendKind]) -> Result<()> {
    let mut router = build_router(config)?;
    if !backends.is_empty() {
        router = router.restrict_to(backends);
    }

    let served = router.backends();
    let config = router.config();
    print_banner(&BannerInfo {
        bind,
        output_root: &config.output_root,
        timeout_secs: config.invocation_timeout.as_secs(),
        backends: served
            .iter()
            .map(|&kind| {
                let location = match router.remote_url(kind) {
                    Some(url) => BackendLocation::Remote { url },
                    None => {
                        let backend = config.backend(kind);
                        BackendLocation::Local {
                            program: &backend.program,
                            script: &backend.script,
                        }
                    }
                };
                (kind, location)
            })
            .collect(),
    });

    let router = Arc::new(router);
    tokio::select! {
        result = server::serve(bind, router) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

/// Print the wire response as JSON; failures exit with status 1.
fn report<R>(envelope: ResponseEnvelope) -> Result<()>
where
    R: From<ResponseEnvelope> + Serialize,
{
    let failed = !envelope.is_success();
    let response = R::from(envelope);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_config(settings: &Settings, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => match settings.get(&key)? {
            Some(value) => println!("{value}"),
            None => bail!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            settings.set(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            settings.remove(&key)?;
            println!("{key} unset");
        }
        ConfigAction::List => {
            let entries = settings.list()?;
            if entries.is_empty() {
                println!("no settings stored; known keys:");
                for key in ServiceConfig::known_keys() {
                    println!("  {key}");
                }
            }
            for (key, value) in entries {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
