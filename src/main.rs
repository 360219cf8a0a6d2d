use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::serve::Listener;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use futures_util::StreamExt;
use relaygate::{
    adapters::{HttpClientAdapter, HttpHandler, TungsteniteDialer},
    config::{ServerConfig, ServerConfigValidator, load_config, loader::load_config_unchecked},
    core::{ForwardService, ReconnectPolicy, RelayContext, RelayRegistry, SessionAcceptor},
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::{GracefulShutdown, tls},
};
use tls_listener::TlsListener;
use tokio::io::{AsyncRead, AsyncWrite};

/// Time given to close frames to flush after all sessions were told to go away.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the relay gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

struct AxumListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for AxumListener<S>
where
    S: futures_util::Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) => tracing::debug!("Accept error: {}", e),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    let provider_installed = rustls::crypto::CryptoProvider::install_default(provider).is_ok();

    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    if !provider_installed {
        tracing::warn!("A rustls crypto provider was already installed; keeping it");
    }

    ServerConfigValidator::validate(&config).context("Invalid configuration")?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    let registry = RelayRegistry::new();
    let context = RelayContext::new(
        Arc::new(TungsteniteDialer::new(config.relay.connect_timeout())),
        registry.clone(),
        ReconnectPolicy::from(&config.relay),
    );
    let adapter = HttpClientAdapter::new().context("Failed to create HTTP client adapter")?;
    let http_client: Arc<dyn HttpClient> = Arc::new(adapter);
    let forward = ForwardService::new(http_client, &config.forward)
        .context("Failed to create forwarding service")?;
    let app = HttpHandler::new(SessionAcceptor::new(context), forward).router();

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(
        "Starting relaygate on {} (TLS enabled: {}, max retries: {}, retry delay: {}ms)",
        config.listen_addr,
        config.tls.enabled,
        config.relay.max_retries,
        config.relay.retry_delay_ms
    );

    let server_result = if config.tls.enabled {
        let tls_config = tls::load_server_config(&config.tls.cert_path, &config.tls.key_path)
            .context("Failed to load TLS certificate or key")?;
        let local_addr = listener.local_addr().context("Failed to get local addr")?;
        let tls_listener = AxumListener {
            stream: TlsListener::new(tls::acceptor(tls_config), listener),
            local_addr,
        };
        run_until_shutdown(axum::serve(tls_listener, app), &graceful_shutdown).await
    } else {
        tracing::warn!("TLS is disabled; serving plain HTTP");
        run_until_shutdown(axum::serve(listener, app), &graceful_shutdown).await
    };

    let closed = registry.shutdown_all().await;
    if closed > 0 {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }
    tracing::info!("Graceful shutdown completed ({} sessions closed)", closed);

    server_result
}

/// Serve until the server fails or a shutdown signal arrives.
async fn run_until_shutdown<F>(server: F, graceful_shutdown: &GracefulShutdown) -> Result<()>
where
    F: std::future::IntoFuture<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = server.into_future() => result.context("Server error"),
        shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
            Ok(())
        }
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config: ServerConfig = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • TLS Enabled: {}", config.tls.enabled);
            println!(
                "   • Reconnect: {} retries, {}ms apart",
                config.relay.max_retries, config.relay.retry_delay_ms
            );
            println!("   • Forward User-Agent: {}", config.forward.user_agent);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Check that cert_path and key_path exist when TLS is enabled");
            println!("   • Verify listen address format (e.g., '0.0.0.0:3000')");
            println!("   • Ensure retry_delay_ms is positive when max_retries > 0");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Relaygate Configuration

# The address to listen on (the PORT environment variable overrides the port)
listen_addr = "0.0.0.0:3000"

[tls]
enabled = true
cert_path = "cert.pem"
key_path = "key.pem"

# Upstream reconnection
[relay]
max_retries = 10
retry_delay_ms = 5000
connect_timeout_ms = 10000

# One-shot /proxy forwarding
[forward]
user_agent = "BotNodeSDK/0.0.1"
timeout_secs = 30

[logging]
level = "info"
json = true
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'relaygate serve --config {config_path}' to start the gateway");
    Ok(())
}
