//! rpcdeck - console for a gRPC reflection gateway
//!
//! ## Modes
//!
//! **Default** (no subcommand): starts the interactive console. A `--link`
//! replays a shared link (target, service, method) on start.
//!
//! **One-shot** (`rpcdeck services`, `rpcdeck invoke`, ...): performs a single
//! gateway call, prints the result and exits.

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use rpcdeck::{
    backend::{
        Backend, DescribeRequest, InvokeKind, InvokeRequest, MethodsRequest, RequestContext,
        ServicesRequest,
    },
    config::{self, ConsoleConfig},
    console::{Console, ConsoleError, ConsoleOptions},
    invoke::pretty_result,
    query::{self, ShareLinkState},
    target,
};

/// rpcdeck - console for a gRPC reflection gateway
///
/// Lists the services and methods of a gRPC target through the gateway,
/// fetches request templates, and invokes or load tests methods.
#[derive(ClapParser, Debug)]
#[command(name = "rpcdeck", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Base URL of the reflection gateway
    #[arg(long, global = true, env = "RPCDECK_SERVER")]
    server: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/rpcdeck/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ask the gateway to dial the target over TLS
    #[arg(long, global = true)]
    tls: bool,

    /// Metadata sent with every request, e.g. '{"authorization":"Bearer x"}'
    #[arg(long, global = true, env = "RPCDECK_METADATA")]
    md: Option<String>,

    /// Local proto file to discover from (repeatable)
    #[arg(long = "proto", global = true)]
    protos: Vec<PathBuf>,

    /// Target to connect to on start
    #[arg(long)]
    target: Option<String>,

    /// Shared link to replay on start
    #[arg(long)]
    link: Option<String>,

    /// Seconds between active-connection refreshes
    #[arg(long)]
    refresh: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the services of a target
    Services {
        target: String,

        /// Drop the gateway's cached connection first
        #[arg(short, long)]
        restart: bool,
    },
    /// List the methods of a service
    Methods { target: String, service: String },
    /// Print a method's request template and schema
    Describe { target: String, method: String },
    /// Invoke a method once
    Invoke {
        target: String,
        method: String,

        /// Request body, or @file to read it from a file
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Load test a method
    Loadtest {
        target: String,
        method: String,

        /// Request body, or @file to read it from a file
        #[arg(long, default_value = "")]
        body: String,
    },
    /// List the gateway's active backend connections
    Conns,
    /// Close one of the gateway's active backend connections
    Close { address: String },
    /// Print a shareable link for a target, service and method
    Link {
        target: String,
        service: Option<String>,
        method: Option<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Services { .. } => "services",
            Commands::Methods { .. } => "methods",
            Commands::Describe { .. } => "describe",
            Commands::Invoke { .. } => "invoke",
            Commands::Loadtest { .. } => "loadtest",
            Commands::Conns => "conns",
            Commands::Close { .. } => "close",
            Commands::Link { .. } => "link",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ConsoleError> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    let server = cli.server.clone().unwrap_or_else(|| config.server.clone());
    let timeout = config.timeout();
    let backend = Backend::new(&server, timeout)?;

    let ctx = RequestContext {
        use_tls: cli.tls || config.use_tls,
        metadata: target::resolve_metadata(
            cli.md.as_deref().or(config.metadata.as_deref()).unwrap_or_default(),
        ),
    };
    let protos = if cli.protos.is_empty() {
        config.protos.clone()
    } else {
        cli.protos.clone()
    };

    match cli.command {
        Some(cmd) => {
            let name = cmd.name();
            if let Err(e) = run_oneshot(cmd, &backend, ctx, protos).await {
                eprintln!("rpcdeck {}: {:#}", name, e);
                std::process::exit(1);
            }
            Ok(())
        }
        None => {
            let refresh_period = match cli.refresh {
                Some(0) => {
                    eprintln!("rpcdeck: --refresh must be at least 1");
                    std::process::exit(2);
                }
                Some(secs) => Duration::from_secs(secs),
                None => config.refresh_period(),
            };
            let options = ConsoleOptions {
                target: cli.target.or(config.target),
                metadata: cli.md.or(config.metadata),
                use_tls: ctx.use_tls,
                protos,
                refresh_period,
                link: cli.link,
            };
            tracing::info!(%server, "starting console");
            Console::new(backend, options).run().await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<ConsoleConfig, config::ConfigError> {
    match path {
        Some(p) => ConsoleConfig::load(p)?.ok_or_else(|| {
            config::ConfigError::ReadFailed(
                p.to_path_buf(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
        }),
        None => match config::default_config_path() {
            Some(p) => ConsoleConfig::load_or_default(&p),
            None => Ok(ConsoleConfig::default()),
        },
    }
}

/// Initialize tracing on stderr so console output on stdout stays clean.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rpcdeck=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── One-shot commands ──────────────────────────────────────────────

async fn run_oneshot(
    cmd: Commands,
    backend: &Backend,
    ctx: RequestContext,
    protos: Vec<PathBuf>,
) -> anyhow::Result<()> {
    match cmd {
        Commands::Services { target, restart } => {
            let target = resolve(&target)?;
            let req = ServicesRequest {
                target: target.clone(),
                restart,
                protos: (!protos.is_empty()).then_some(protos),
                ctx,
            };
            let services = backend
                .list_services(&req)
                .await
                .with_context(|| format!("failed to list services of {}", target))?;
            if services.is_empty() {
                println!("No services.");
            }
            for s in services {
                println!("{}", s);
            }
        }
        Commands::Methods { target, service } => {
            let req = MethodsRequest {
                target: resolve(&target)?,
                service,
                ctx,
            };
            let methods = backend.list_methods(&req).await?;
            if methods.is_empty() {
                println!("No methods.");
            }
            for m in methods {
                println!("{}", m);
            }
        }
        Commands::Describe { target, method } => {
            let req = DescribeRequest {
                target: resolve(&target)?,
                method,
                ctx,
            };
            let desc = backend.describe(&req).await?;
            println!("{}", desc.schema);
            println!();
            println!("{}", desc.template);
        }
        Commands::Invoke { target, method, body } => {
            invoke(backend, InvokeKind::Invoke, &target, method, &body, ctx).await?
        }
        Commands::Loadtest { target, method, body } => {
            invoke(backend, InvokeKind::LoadTest, &target, method, &body, ctx).await?
        }
        Commands::Conns => {
            let conns = backend.active_connections().await?;
            if conns.is_empty() {
                println!("No active connections.");
            }
            for c in conns {
                println!("{}", c);
            }
        }
        Commands::Close { address } => {
            if backend.close_connection(&address).await? {
                println!("Closed {}.", address);
            } else {
                anyhow::bail!("gateway did not close {}", address);
            }
        }
        Commands::Link { target, service, method } => {
            let state = ShareLinkState {
                target: target.trim().to_string(),
                service: service.unwrap_or_default(),
                method: method.unwrap_or_default(),
            };
            println!("{}", query::build_share_link(backend.base_url(), &state));
        }
    }
    Ok(())
}

async fn invoke(
    backend: &Backend,
    kind: InvokeKind,
    target: &str,
    method: String,
    body: &str,
    ctx: RequestContext,
) -> anyhow::Result<()> {
    let body = match body.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path))?,
        None => body.to_string(),
    };
    let req = InvokeRequest {
        kind,
        target: resolve(target)?,
        method,
        body,
        ctx,
    };
    let reply = backend.invoke(&req).await?;
    println!("{}", pretty_result(&reply.result));
    eprintln!("time: {}", reply.timer);
    Ok(())
}

fn resolve(raw: &str) -> anyhow::Result<String> {
    target::resolve_target(raw, None).context("target is empty")
}
