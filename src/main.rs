//! mcpchat CLI - manage MCP servers and chat with tool-calling models

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use mcpchat::agent_core::{frames, LocalBlobStorage, Orchestrator, SqliteHistory, TurnRequest};
use mcpchat::inference::InferenceClient;
use mcpchat::mcp_client::{
    ConnectionRegistry, DefaultTransportFactory, ServerConfig, ServerConfigStore,
};
use mcpchat::settings::Settings;

#[derive(Parser)]
#[command(name = "mcpchat")]
#[command(about = "Chat with a language model that can call MCP server tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (default: discovered mcpchat.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to stderr instead of the log file
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Server definition commands
    Servers {
        #[command(subcommand)]
        command: ServerCommands,
    },
    /// Connect every configured server and print its state
    Status,
    /// List the tools of one server
    Tools {
        /// Server ID
        server_id: String,
    },
    /// List stored chat sessions
    Sessions,
    /// Run one chat turn and print the event stream
    Chat {
        /// Session to continue (default: a new one)
        #[arg(short, long)]
        session: Option<String>,
        /// The user message
        message: String,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// List configured servers
    List,
    /// Register a new server
    Add {
        /// Server ID (must not contain "__")
        #[arg(long)]
        id: String,
        /// Display name (default: the ID)
        #[arg(long)]
        name: Option<String>,
        /// Transport kind: stdio, http or sse
        #[arg(long, default_value = "stdio")]
        transport: String,
        /// Command to spawn (stdio)
        #[arg(long)]
        command: Option<String>,
        /// Command argument (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Working directory (stdio)
        #[arg(long)]
        cwd: Option<String>,
        /// Server URL (http, sse)
        #[arg(long)]
        url: Option<String>,
        /// Static request header KEY=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
    },
    /// Remove a server
    Remove {
        /// Server ID
        id: String,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    mcpchat::init_tracing(cli.log_stderr).context("failed to initialize logging")?;

    let settings = Settings::discover(cli.config.as_deref())?;
    let store = ServerConfigStore::open(settings.servers_path())?;

    match cli.command {
        Commands::Servers { command } => match command {
            ServerCommands::List => {
                for server in store.list() {
                    let target = server
                        .url
                        .clone()
                        .or_else(|| {
                            server
                                .command
                                .as_ref()
                                .map(|c| format!("{c} {}", server.args.join(" ")))
                        })
                        .unwrap_or_default();
                    println!(
                        "{}\t{}\t{}\t{}",
                        server.id,
                        server.name,
                        server.transport,
                        target.trim_end()
                    );
                }
            }
            ServerCommands::Add {
                id,
                name,
                transport,
                command,
                args,
                env,
                cwd,
                url,
                headers,
            } => {
                let config = ServerConfig {
                    name: name.unwrap_or_else(|| id.clone()),
                    id,
                    transport,
                    command,
                    args,
                    env: env.into_iter().collect::<HashMap<_, _>>(),
                    cwd,
                    url,
                    headers: headers.into_iter().collect::<HashMap<_, _>>(),
                };
                let server_id = config.id.clone();
                store.add(config)?;
                println!("added {server_id} to {}", store.path().display());
            }
            ServerCommands::Remove { id } => {
                store.remove(&id)?;
                println!("removed {id}");
            }
        },
        Commands::Status => {
            let registry = registry(&settings)?;
            for state in registry.connect_all(&store.list()).await {
                println!("{}", serde_json::to_string(&state)?);
            }
            registry.disconnect_all().await;
        }
        Commands::Tools { server_id } => {
            let Some(server) = store.get(&server_id) else {
                bail!("unknown server '{server_id}'");
            };
            let registry = registry(&settings)?;
            let state = registry.connect(&server).await;
            let tools = if state.is_connected() {
                registry.list_tools(&server_id).await
            } else {
                registry.disconnect_all().await;
                bail!(
                    "{server_id}: {}",
                    state.error.unwrap_or_else(|| "not connected".to_string())
                );
            };
            registry.disconnect_all().await;
            for tool in tools? {
                println!("{}\t{}", tool.name, tool.description.unwrap_or_default());
            }
        }
        Commands::Sessions => {
            let history = open_history(&settings)?;
            for session in history.list_sessions()? {
                println!(
                    "{}\t{} messages\tlast active {}",
                    session.id, session.message_count, session.last_activity
                );
            }
        }
        Commands::Chat { session, message } => {
            chat(&settings, &store, session, message).await?;
        }
    }

    Ok(())
}

fn registry(settings: &Settings) -> Result<Arc<ConnectionRegistry>> {
    let factory = DefaultTransportFactory::new()?;
    Ok(Arc::new(ConnectionRegistry::new(
        Arc::new(factory),
        settings.registry_options(),
    )))
}

fn open_history(settings: &Settings) -> Result<SqliteHistory> {
    let path = settings.history_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(SqliteHistory::open(&path.to_string_lossy())?)
}

async fn chat(
    settings: &Settings,
    store: &ServerConfigStore,
    session: Option<String>,
    message: String,
) -> Result<()> {
    let model = InferenceClient::from_config(&settings.models_config()?)?;
    let history = open_history(settings)?;
    let storage = LocalBlobStorage::new(settings.storage_dir(), settings.public_base_url());

    let registry = registry(settings)?;
    for state in registry.connect_all(&store.list()).await {
        if let Some(error) = &state.error {
            eprintln!("warning: {} not connected: {error}", state.server_id);
        }
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        Arc::new(model),
        Arc::new(history),
        Arc::new(storage),
        settings.orchestrator_options(),
    ));

    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut request = TurnRequest::new(&session_id, message);
    request.assistant_message_id = Some(uuid::Uuid::new_v4().to_string());
    tracing::info!(session = %session_id, "starting chat turn");

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (events, handle) = orchestrator.spawn_turn(request, cancel);
    let mut output = frames(events);
    let mut stdout = std::io::stdout();
    while let Some(frame) = output.next().await {
        stdout.write_all(frame.as_bytes())?;
        stdout.flush()?;
    }

    let outcome = handle.await.context("chat turn task failed")?;
    ctrl_c.abort();
    registry.disconnect_all().await;

    eprintln!(
        "session {session_id}: {} round(s), {} tool call(s)",
        outcome.rounds,
        outcome.tool_calls.len()
    );
    if let Some(error) = outcome.error {
        bail!(error);
    }
    Ok(())
}
