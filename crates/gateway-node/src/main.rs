//! gateway-node — the payment-gateway service binary (component S).
//!
//! Startup sequence:
//!   1. Load configuration (env > file > defaults)
//!   2. Build the RNG journal backend selected by `RNG_STORAGE`
//!   3. Build antifraud stores, the platform HTTP client, and the update dispatcher
//!   4. Wire the payments/settlement services and the update router
//!   5. Assemble the HTTP router and serve it; additionally start the
//!      long-polling runner when `TELEGRAM_MODE=long_polling`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use gateway_antifraud::{SuspiciousIpStore, TokenBucketStore, VelocityChecker, VelocityConfig};
use gateway_api::AppState;
use gateway_config::{CliOverrides, GatewayConfig, RngStorage, TelegramMode};
use gateway_core::{CaseConfig, CaseStore, StaticCaseStore};
use gateway_fairness::{FileRngJournal, InMemoryRngJournal, RngJournalBackend, RngService, SqlRngJournal};
use gateway_ingress::dedup::InMemoryDedupStore;
use gateway_ingress::dispatcher::{DispatcherConfig, UpdateDispatcher};
use gateway_ingress::long_polling::{LongPollingConfig, LongPollingRunner};
use gateway_ingress::platform_client::PlatformHttpClient;
use gateway_payments::{InvoiceService, PreCheckoutHandler, SuccessfulPaymentHandler, UpdateRouter};
use gateway_settlement::{AwardService, RefundService};

#[derive(Parser, Debug)]
#[command(name = "gateway-node", version, about = "Telegram Stars payment-gateway service")]
struct Args {
    /// Path to an optional TOML config file. Overrides GATEWAY_CONFIG_FILE.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080. Overrides BIND.
    #[arg(long)]
    bind: Option<String>,

    /// Directory for file-backed RNG journal state. Overrides RNG_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to the case catalog JSON file.
    #[arg(long, default_value = "./cases.json")]
    cases_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gateway=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("gateway-node starting");

    let overrides = CliOverrides {
        bind: args.bind.clone(),
        data_dir: args.data_dir.as_ref().map(|p| p.display().to_string()),
        config_path: args.config.as_ref().map(|p| p.display().to_string()),
    };
    let config = GatewayConfig::load(overrides).map_err(|e| anyhow::anyhow!(e.to_string())).context("loading configuration")?;

    let cases = load_cases(&args.cases_file).context("loading case catalog")?;
    let cases: Arc<dyn CaseStore> = Arc::new(StaticCaseStore::new(cases));

    std::fs::create_dir_all(&config.data_dir).with_context(|| format!("creating data dir {}", config.data_dir))?;

    let rng_journal = build_rng_journal(&config).await.context("opening RNG journal")?;
    let rng = Arc::new(RngService::new(rng_journal, config.rng.fairness_key.clone()));

    let platform: Arc<dyn gateway_ingress::platform_client::PlatformApi> =
        Arc::new(PlatformHttpClient::new(&config.telegram.bot_token));

    let suspicious_ips = Arc::new(SuspiciousIpStore::new());
    let token_buckets = Arc::new(TokenBucketStore::new());
    let velocity = Arc::new(VelocityChecker::new(VelocityConfig::default()));

    let invoices = Arc::new(InvoiceService::new(platform.clone(), cases.clone(), config.payments.title_prefix.clone()));
    let pre_checkout = Arc::new(PreCheckoutHandler::new(platform.clone(), cases.clone(), velocity.clone()));
    let refunds = Arc::new(RefundService::new(platform.clone()));
    let award = Arc::new(AwardService::new(platform.clone(), cases.clone(), refunds.clone()));
    let successful_payment = Arc::new(SuccessfulPaymentHandler::new(
        rng.clone(),
        cases.clone(),
        award,
        refunds,
        platform.clone(),
        config.payments.receipt_enabled,
    ));
    let router_handler =
        Arc::new(UpdateRouter::new(pre_checkout, successful_payment, || chrono::Utc::now().timestamp()));

    let dispatcher_config = DispatcherConfig::default();
    let dedup = Arc::new(InMemoryDedupStore::new(dispatcher_config.dedup_ttl_ms));
    let dispatcher = Arc::new(UpdateDispatcher::new(dispatcher_config, dedup, router_handler));
    dispatcher.start().await;

    let state = Arc::new(AppState {
        platform: platform.clone(),
        dispatcher: dispatcher.clone(),
        invoices,
        rng,
        cases,
        suspicious_ips,
        token_buckets,
        velocity,
        ip_bucket_params: config.antifraud.ip.params,
        subject_bucket_params: config.antifraud.subject.params,
        trust_proxy: config.antifraud.trust_proxy,
        bot_token: config.telegram.bot_token.clone(),
        webhook_secret_token: config.telegram.webhook_secret_token.clone(),
        admin_token: config.telegram.admin_token.clone(),
    });

    let long_polling_runner = if config.telegram.mode == TelegramMode::LongPolling {
        let runner = Arc::new(LongPollingRunner::new(platform.clone(), dispatcher.clone(), LongPollingConfig::default()));
        runner.start().await;
        Some(runner)
    } else {
        None
    };

    let app = gateway_api::router(state, &config.telegram.webhook_path);
    let addr: SocketAddr = config.bind.parse().with_context(|| format!("parsing bind address {}", config.bind))?;
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, mode = ?config.telegram.mode, "gateway-node ready");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    if let Some(runner) = long_polling_runner {
        runner.stop().await;
    }
    dispatcher.close().await;

    info!("gateway-node stopped");
    Ok(())
}

async fn build_rng_journal(config: &GatewayConfig) -> anyhow::Result<RngJournalBackend> {
    match config.rng.storage {
        RngStorage::Memory => Ok(RngJournalBackend::Memory(InMemoryRngJournal::new())),
        RngStorage::File => {
            let journal = FileRngJournal::open(&config.rng.data_dir).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(RngJournalBackend::File(journal))
        }
        RngStorage::Db => {
            let url = config.rng.db_url.as_deref().context("RNG_DB_URL is required when RNG_STORAGE=db")?;
            let journal = SqlRngJournal::connect(url).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(RngJournalBackend::Sql(journal))
        }
    }
}

/// Loads the static case catalog from a JSON file (array of `CaseConfig`).
/// The upstream catalog service is out of scope; a missing file starts the
/// gateway with an empty catalog rather than failing startup.
fn load_cases(path: &std::path::Path) -> anyhow::Result<Vec<CaseConfig>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "case catalog file not found, starting with an empty catalog");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).with_context(|| format!("reading case catalog {}", path.display())),
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing case catalog {}", path.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
