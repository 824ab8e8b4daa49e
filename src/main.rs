//! CLI for the chat room
//!
//! Subcommands:
//! - `server`: run the broadcast server
//! - `client`: join the room from this terminal

use chatroom::client::{ChatSession, ConsoleSink};
use chatroom::config::{ClientSettings, ServerSettings, load_config};
use chatroom::transport::ChatServer;
use chatroom::utils::logging;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "chatroom")]
enum Command {
    /// Start the chat server
    Server {
        /// Address to listen on (overrides the configuration)
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Join the chat room from the console
    Client {
        /// Server address (overrides the configuration)
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, short)]
        username: Option<String>,
        #[arg(long)]
        log_level: Option<String>,
    },
}

impl Command {
    fn log_level(&self) -> Option<&str> {
        match self {
            Command::Server { log_level, .. } | Command::Client { log_level, .. } => {
                log_level.as_deref()
            }
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cmd = Command::parse();
    let config = load_config();

    let level = cmd
        .log_level()
        .map(str::to_string)
        .or_else(|| config.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    logging::init(&level);

    let settings = match config {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cmd {
        Command::Server { host, port, .. } => {
            let mut server = settings.server;
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            run_server(server).await
        }
        Command::Client {
            host,
            port,
            username,
            ..
        } => {
            let mut client = settings.client;
            if let Some(host) = host {
                client.host = host;
            }
            if let Some(port) = port {
                client.port = port;
            }
            if let Some(username) = username {
                client.username = username;
            }
            run_client(client).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: ServerSettings) -> Result<(), Box<dyn std::error::Error>> {
    let server = ChatServer::bind(settings).await?;

    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received. Exiting gracefully."),
                Err(e) => {
                    error!("Unable to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    Ok(())
}

async fn run_client(settings: ClientSettings) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = ChatSession::new(settings, ConsoleSink::stdout());
    session.connect().await?;

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome = tokio::select! {
        result = session.run(stdin) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted. Leaving the chat room.");
            Ok(())
        }
    };

    session.shutdown().await;
    outcome?;
    Ok(())
}
