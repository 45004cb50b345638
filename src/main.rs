//! mTLS Tunnel - carry plaintext TCP services over mutually authenticated TLS
//!
//! The `client` end listens locally and dials the tunnel server over TLS
//! with a client certificate; the `server` end terminates TLS, requires a
//! client certificate, and forwards each session to a plaintext backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mtls_client::ClientForwarder;
use mtls_config::{
    ClientConfigFile, ServerConfigFile, DEFAULT_CLIENT_CONFIG_PATH, DEFAULT_SERVER_CONFIG_PATH,
};
use mtls_server::ServerForwarder;
use mtls_tls::DevPki;
use std::future::Future;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// mTLS Tunnel - forward TCP services through a mutually authenticated TLS tunnel
#[derive(Parser, Debug)]
#[command(name = "mtls-tunnel")]
#[command(about = "Forward TCP services through a mutually authenticated TLS tunnel")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "MTLS_TUNNEL_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept local plaintext connections and forward them to the tunnel server
    #[command(long_about = r#"
Listen on a local plaintext port and forward every connection to the tunnel
server over TLS, presenting the configured client certificate.

EXAMPLES:
  # Use the default configuration file
  mtls-tunnel client

  # Use an explicit configuration file with debug logging
  mtls-tunnel --log-level debug client --config /etc/mtls-tunnel/client_config.yaml
"#)]
    Client {
        /// Client configuration file (YAML)
        #[arg(long, short = 'c', env = "MTLS_TUNNEL_CLIENT_CONFIG", default_value = DEFAULT_CLIENT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Accept tunnel clients over TLS and forward them to the plaintext backend
    #[command(long_about = r#"
Listen for TLS connections, require a client certificate signed by the
configured CA, and forward every authenticated session to the backend.

EXAMPLES:
  # Use the default configuration file
  mtls-tunnel server

  # Use an explicit configuration file
  mtls-tunnel server --config /etc/mtls-tunnel/server_config.yaml
"#)]
    Server {
        /// Server configuration file (YAML)
        #[arg(long, short = 'c', env = "MTLS_TUNNEL_SERVER_CONFIG", default_value = DEFAULT_SERVER_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Generate a development CA plus server and client certificates
    ///
    /// DO NOT use in production.
    DevPki {
        /// Directory to write ca.crt, server.crt/.key and client.crt/.key to
        #[arg(long, default_value = "../certs")]
        out_dir: PathBuf,

        /// DNS name or IP the server certificate is valid for (repeatable)
        #[arg(long = "server-name", default_values = ["localhost", "127.0.0.1"])]
        server_names: Vec<String>,

        /// Common name of the client certificate
        #[arg(long, default_value = "tunnel-client")]
        client_name: String,
    },
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

async fn run_client(config_path: PathBuf) -> Result<()> {
    let config =
        ClientConfigFile::load(&config_path).context("Failed to load client configuration")?;

    info!("Local listener: {}", config.listen_addr());
    info!("Tunnel server: {}", config.server_addr());
    info!("Server name: {}", config.server_name());

    let forwarder =
        ClientForwarder::from_config_file(&config).context("Failed to set up client TLS")?;
    let listener = forwarder.bind().await?;

    run_until_ctrl_c("Client", forwarder.serve(listener)).await
}

async fn run_server(config_path: PathBuf) -> Result<()> {
    let config =
        ServerConfigFile::load(&config_path).context("Failed to load server configuration")?;

    info!("TLS listener: {}", config.listen_addr());
    info!("Backend: {}", config.backend_addr());

    let forwarder =
        ServerForwarder::from_config_file(&config).context("Failed to set up server TLS")?;
    let listener = forwarder.bind().await?;

    run_until_ctrl_c("Server", forwarder.serve(listener)).await
}

/// Drive an accept loop until it fails or Ctrl+C is received
async fn run_until_ctrl_c<F, E>(name: &str, serve: F) -> Result<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let serve_task = tokio::spawn(serve);

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = serve_task => {
            match result {
                Ok(Ok(())) => {
                    info!("{} stopped normally", name);
                }
                Ok(Err(e)) => {
                    error!("{} error: {}", name, e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("{} task panicked: {}", name, e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

fn run_dev_pki(out_dir: PathBuf, server_names: Vec<String>, client_name: String) -> Result<()> {
    let names: Vec<&str> = server_names.iter().map(String::as_str).collect();
    let paths = DevPki::generate(&names, &client_name)
        .context("Failed to generate development certificates")?
        .write_to_dir(&out_dir)?;

    info!("⚠️  Development certificates - DO NOT use in production");
    info!("CA certificate:     {}", paths.ca_cert.display());
    info!("Server certificate: {}", paths.server_cert.display());
    info!("Server key:         {}", paths.server_key.display());
    info!("Client certificate: {}", paths.client_cert.display());
    info!("Client key:         {}", paths.client_key.display());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;

    match cli.command {
        Commands::Client { config } => {
            info!("mTLS tunnel client starting...");
            run_client(config).await
        }
        Commands::Server { config } => {
            info!("mTLS tunnel server starting...");
            run_server(config).await
        }
        Commands::DevPki {
            out_dir,
            server_names,
            client_name,
        } => run_dev_pki(out_dir, server_names, client_name),
    }
}
