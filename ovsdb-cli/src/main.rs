//! ovsdb-cli - Command-line interface for OVSDB servers
//!
//! Runs one command per invocation against the server at `--endpoint`.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use ovsdb_client::{Client, ClientConfig, Endpoint, TlsClientConfig};
use ovsdb_core::Generation;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ovsdb-cli")]
#[command(about = "Command-line interface for OVSDB servers")]
#[command(version)]
struct Cli {
    /// Server endpoint (tcp:HOST:PORT, ssl:HOST:PORT or unix:PATH)
    #[arg(
        short,
        long,
        env = "OVSDB_ENDPOINT",
        default_value = "unix:/var/run/openvswitch/db.sock"
    )]
    endpoint: Endpoint,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    // ===== TLS Options =====
    /// Path to CA certificate for server verification
    #[arg(long, env = "OVSDB_TLS_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate
    #[arg(long, env = "OVSDB_TLS_CLIENT_CERT")]
    client_cert: Option<PathBuf>,

    /// Path to client private key
    #[arg(long, env = "OVSDB_TLS_CLIENT_KEY")]
    client_key: Option<PathBuf>,

    /// Server name for TLS SNI (defaults to endpoint host)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the databases on the server
    ListDbs,

    /// Print the schema of a database
    GetSchema {
        /// Database name
        database: String,

        /// Print the raw schema JSON
        #[arg(long)]
        json: bool,
    },

    /// Send an echo request and check the reply
    Echo {
        /// Values to echo (JSON, plain words are sent as strings)
        #[arg(default_value = "ping")]
        args: Vec<String>,
    },

    /// Subscribe to tables and print changes until interrupted
    Monitor {
        /// Database name
        database: String,

        /// Tables to monitor
        #[arg(required = true)]
        tables: Vec<String>,

        /// Columns to report (default: all)
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Conditions as a JSON array, e.g. '[["name","==","br0"]]'
        #[arg(short, long = "where")]
        where_: Option<String>,

        /// Protocol generation: plain, conditional or conditional_since
        #[arg(short, long, default_value = "conditional_since", value_parser = parse_generation)]
        generation: Generation,

        /// Skip the initial contents
        #[arg(long)]
        no_initial: bool,

        /// Subscription name
        #[arg(long, default_value = "ovsdb-cli")]
        name: String,
    },

    /// Run a transaction
    Transact {
        /// Database name
        database: String,

        /// Operations as a JSON array (or @file.json to read from file)
        operations: String,
    },
}

fn parse_generation(s: &str) -> Result<Generation, String> {
    Generation::parse(s).ok_or_else(|| format!("unknown generation: {}", s))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = ClientConfig::new(cli.endpoint.clone())
        .with_request_timeout(Duration::from_secs(cli.timeout));

    if cli.endpoint.is_tls() || cli.ca_cert.is_some() || cli.client_cert.is_some() {
        let mut tls = TlsClientConfig::new();
        tls.ca_cert_path = cli.ca_cert.clone();
        tls.client_cert_path = cli.client_cert.clone();
        tls.client_key_path = cli.client_key.clone();
        tls.server_name = cli.server_name.clone();
        if let Err(e) = tls.validate() {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
        config = config.with_tls(tls);
    }

    let client = Client::connect(config).await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = match cli.command {
        cmd @ Commands::Monitor { .. } => commands::monitor(&client, cmd).await,
        cmd => commands::execute(&client, cmd).await.map(|output| {
            println!("{}", output);
        }),
    };

    client.close().await;

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
