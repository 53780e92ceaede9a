use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentsock_cli::cli::{print_config, run_chat, run_exec};
use agentsock_cli::config::{resolve_endpoint, Config};
use agentsock_cli::core::resolve_project_with;
use agentsock_cli::session::{AgentSession, InjectedPicker, SessionSettings};
use agentsock_cli::storage::LocalStore;
use agentsock_cli::transport::loopback::SimulatedAgent;
use agentsock_cli::transport::LoopbackTransport;

#[derive(Parser)]
#[command(name = "agentsock")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("AGENTSOCK_VERSION_SUFFIX")),
    about = "agentsock - drive a remote task-execution agent over a socket",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct ConnectArgs {
    /// Agent server origin (overrides server.endpoint)
    #[arg(long)]
    endpoint: Option<String>,

    /// Socket.IO path (overrides server.path)
    #[arg(long)]
    path: Option<String>,

    /// Origin of the page hosting the session; the agent is served from it
    #[arg(long)]
    origin: Option<String>,

    /// Hostname of the page being edited; the project is derived from it
    #[arg(long)]
    host: Option<String>,

    /// Explicit project (overrides --host)
    #[arg(long)]
    project: Option<String>,

    /// Talk to a built-in simulated agent instead of a server
    #[arg(long)]
    sim: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat with the agent
    Chat {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Send one query and print the outcome
    Exec {
        /// Query text
        query: String,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Show the project a hostname resolves to
    Project {
        /// Page hostname (e.g. jlm-app.robinswood.io)
        hostname: String,
    },

    /// Show the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    match path {
        Some(path) => Ok((Config::load_from(path)?, Some(path.clone()))),
        None => {
            let path = Config::config_path().ok();
            Ok((Config::load()?, path))
        }
    }
}

/// Build a session and connect it as the flags ask
async fn open_session(
    mut config: Config,
    args: &ConnectArgs,
) -> Result<(AgentSession, Arc<InjectedPicker>)> {
    if let Some(endpoint) = &args.endpoint {
        config.server.endpoint = endpoint.clone();
    }
    if let Some(path) = &args.path {
        config.server.path = path.clone();
    }
    if let Some(project) = &args.project {
        config.project.default = Some(project.clone());
    }

    let store = LocalStore::new()?;
    let user_id = store.user_id_or(&config.session.user_id_fallback);
    let project = config.project.resolve(args.host.as_deref());
    tracing::debug!("Session project: {:?}", project);

    let picker = Arc::new(InjectedPicker::new());
    let session = AgentSession::new(SessionSettings::from_config(&config, user_id, project))
        .with_picker(picker.clone());

    if args.sim {
        let (client, server) = LoopbackTransport::pair();
        SimulatedAgent::new(Duration::from_millis(400)).spawn(server);
        session.attach(client).await?;
    } else {
        let endpoint = resolve_endpoint(args.origin.as_deref(), &config);
        session
            .connect(
                &endpoint,
                &config.server.path,
                &config.server.transports,
                config.server.transport_options(),
            )
            .await;
    }

    Ok((session, picker))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "agentsock_cli=debug"
    } else {
        "agentsock_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Chat { connect } => {
            let (config, _) = load_config(cli.config.as_ref())?;
            let (session, picker) = open_session(config, &connect).await?;
            run_chat(session, picker).await?;
        }
        Commands::Exec { query, connect } => {
            let (config, _) = load_config(cli.config.as_ref())?;
            let (session, _picker) = open_session(config, &connect).await?;
            if !run_exec(session, &query).await? {
                std::process::exit(1);
            }
        }
        Commands::Project { hostname } => {
            let (config, _) = load_config(cli.config.as_ref())?;
            match resolve_project_with(&hostname, &config.project.alias_table()) {
                Some(project) => println!("{}", project),
                None => {
                    eprintln!("{} {}", "No project for".yellow(), hostname);
                    std::process::exit(1);
                }
            }
        }
        Commands::Config => {
            let (config, path) = load_config(cli.config.as_ref())?;
            print_config(&config, path.as_deref())?;
        }
    }

    Ok(())
}
