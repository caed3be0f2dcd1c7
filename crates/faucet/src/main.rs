//! Faucet service binary

use clap::Parser;
use faucet_common::utils::init_logging;
use monad_faucet::api::{router, AppState};
use monad_faucet::{
    ChainTransfer, DisabledVerifier, FaucetConfig, FaucetError, FaucetService, HumanVerifier, Ledger,
    RecaptchaVerifier, SledLedger,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Private key
    #[arg(long, env = "FAUCET_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Dispense amount (in wei)
    #[arg(long)]
    dispense_amount: Option<String>,

    /// Cooldown window (seconds)
    #[arg(long)]
    cooldown: Option<u64>,

    /// Database path
    #[arg(long)]
    db_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut FaucetConfig) {
        if let Some(addr) = self.server_addr {
            config.server_addr = addr;
        }
        if let Some(rpc_url) = self.rpc_url {
            config.rpc_url = rpc_url;
        }
        if let Some(key) = self.private_key {
            config.private_key = Some(key);
        }
        if let Some(amount) = self.dispense_amount {
            config.dispense_amount = amount;
        }
        if let Some(window) = self.cooldown {
            config.cooldown_secs = window;
        }
        if let Some(path) = self.db_path {
            config.db_path = path;
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("logging: {}", e))?;
    info!("Starting faucet service v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Dispense amount: {}", config.dispense_display()?);
    info!("  Cooldown: {}s per requester and per address", config.cooldown_secs);

    let ledger = SledLedger::open(&config.db_path)?;
    let stats = ledger.stats()?;
    info!("Ledger opened at {}: {} claims, {} addresses", config.db_path, stats.total_claims, stats.unique_addresses);

    let verifier: Arc<dyn HumanVerifier> = if config.captcha_enabled {
        let secret = config
            .captcha_secret
            .clone()
            .ok_or_else(|| FaucetError::Config("captcha_secret is not set".to_string()))?;
        Arc::new(RecaptchaVerifier::new(
            config.captcha_verify_url.clone(),
            secret,
            config.http_timeout(),
        )?)
    } else {
        warn!("Captcha verification is DISABLED, every token is accepted");
        Arc::new(DisabledVerifier)
    };

    let transfer = Arc::new(ChainTransfer::connect(&config).await?);

    let service = Arc::new(FaucetService::new(&config, Arc::new(ledger), verifier, transfer)?);
    info!("Faucet service initialized");

    let state = AppState {
        service,
        trust_forwarded_for: config.trust_forwarded_for,
        metrics_enabled: config.metrics_enabled,
    };
    let app = router(state, config.cors_enabled);

    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
