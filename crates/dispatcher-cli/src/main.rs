//! Dispatcher command-line client
//!
//! Connects to a dispatcher over WebSocket, optionally logs in, and runs one
//! command: issue a call, stream events, emit an event, or look up an errno.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use dispatcher_rpc::{ClientConfig, ClientEvent, DispatcherClient, ErrorKind, Session};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Dispatcher command-line client
#[derive(Parser)]
#[command(name = "dispatcherctl")]
#[command(about = "Talk to a middleware dispatcher over its RPC and event protocol")]
#[command(version)]
#[command(after_help = "\
Examples:
  dispatcherctl -H nas.local -u root call system.info.version
  dispatcherctl -H nas.local call volume.query '[[\"name\", \"=\", \"tank\"]]'
  dispatcherctl -H nas.local -u root listen 'task.*'
  dispatcherctl -H nas.local emit client.ready '{\"pid\": 1234}'
  dispatcherctl errno 60
")]
struct Cli {
    /// Dispatcher host
    #[arg(short = 'H', long, env = "DISPATCHER_HOST", default_value = "localhost", global = true)]
    host: String,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dispatcher port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Use wss:// instead of ws://
    #[arg(long, global = true)]
    secure: bool,

    /// Call timeout in seconds
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Username to log in with
    #[arg(short, long, env = "DISPATCHER_USER", global = true)]
    username: Option<String>,

    /// Password for --username
    #[arg(long, env = "DISPATCHER_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Session token from an earlier login
    #[arg(long, env = "DISPATCHER_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call an RPC method and print its result
    Call {
        /// Method name, e.g. system.info.version
        method: String,

        /// Positional arguments; each is parsed as JSON, or sent as a string
        args: Vec<String>,
    },

    /// Print events until interrupted
    Listen {
        /// Event name patterns to subscribe to
        #[arg(default_value = "*")]
        patterns: Vec<String>,
    },

    /// Emit an event
    Emit {
        /// Event name
        name: String,

        /// Event arguments as JSON
        #[arg(default_value = "null")]
        args: String,
    },

    /// Log in and print the issued session
    Login,

    /// Look up an errno by name or code (offline)
    Errno {
        /// Symbolic name (ENOENT) or numeric code (2)
        query: String,
    },
}

fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dispatcher={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("dispatcherctl-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep the writer alive for the whole process
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Default config file location (~/.config/dispatcher/config.json)
fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "dispatcher").map(|dirs| dirs.config_dir().join("config.json"))
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            ClientConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => ClientConfig::default(),
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(timeout) = cli.timeout {
        config.call_timeout_ms = timeout.saturating_mul(1000);
    }
    if cli.secure {
        config.secure = true;
    }
    if config.resource.is_none() {
        config.resource = Some("dispatcherctl".to_string());
    }

    Ok(config)
}

/// Connect and, when credentials were given, log in
async fn open_client(cli: &Cli, config: ClientConfig) -> Result<DispatcherClient> {
    let mut client = DispatcherClient::new(config);
    client
        .connect(&cli.host)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.host))?;

    if let Some(token) = &cli.token {
        client.login_token(token)?;
        wait_for_login(&mut client).await?;
    } else if let Some(username) = &cli.username {
        let Some(password) = &cli.password else {
            bail!("--username requires --password or DISPATCHER_PASSWORD");
        };
        client.login(username, password)?;
        wait_for_login(&mut client).await?;
    }

    Ok(client)
}

async fn wait_for_login(client: &mut DispatcherClient) -> Result<Session> {
    while let Some(event) = client.recv().await {
        match event {
            ClientEvent::LoggedIn(session) => {
                info!("Logged in as {}", session.username);
                return Ok(session);
            }
            ClientEvent::Error(report)
                if matches!(
                    report.kind,
                    ErrorKind::RpcCallError | ErrorKind::RpcCallTimeout
                ) =>
            {
                bail!("Login failed: {}", report.message);
            }
            ClientEvent::Disconnected => bail!("Connection closed during login"),
            _ => {}
        }
    }
    bail!("Connection closed during login")
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    if let Commands::Errno { query } = &cli.command {
        return commands::run_errno(query);
    }

    let config = load_config(&cli)?;
    let mut client = open_client(&cli, config).await?;

    let result = match &cli.command {
        Commands::Call { method, args } => commands::run_call(&client, method, args).await,
        Commands::Listen { patterns } => commands::run_listen(&mut client, patterns).await,
        Commands::Emit { name, args } => commands::run_emit(&client, name, args),
        Commands::Login => commands::run_login(&client),
        Commands::Errno { .. } => Ok(()),
    };

    if client.is_connected() {
        client.disconnect().await?;
    }
    result
}
