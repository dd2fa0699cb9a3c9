#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use pbi_daemon::middleware::CorsConfig;
use pbi_daemon::{build_app, AppState};
use pbi_policy::{PolicyDocument, PolicyEngine};
use pbi_store::{PoolConfig, Store};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// The multi-tenant presence-bound identity attestation service.
#[derive(Parser, Debug)]
#[command(name = "pbid", about = "PBI attestation service daemon")]
struct Args {
    /// Path to the TOML runtime configuration file.
    #[arg(long, default_value = "pbi.toml")]
    config: PathBuf,

    /// Path to the `pbi-policy-1.0` JSON policy document.
    #[arg(long, default_value = "policy.json")]
    policy: PathBuf,

    /// Address to bind the HTTP listener to. Falls back to
    /// `0.0.0.0:<config.port>` when omitted, so the config file's `port`
    /// still takes effect for deployments that don't pass this flag.
    #[arg(long)]
    bind: Option<String>,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

/// How often the webhook delivery worker claims and attempts a batch.
const WEBHOOK_TICK_INTERVAL: Duration = Duration::from_secs(5);
/// Deliveries claimed per tick.
const WEBHOOK_BATCH_SIZE: i64 = 25;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = pbi_config::load_config(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    match pbi_config::validate_config(&config) {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!(%warning, "configuration warning");
            }
        }
        Err(e) => anyhow::bail!("invalid configuration: {e}"),
    }

    let store = Store::connect(&config.database_url, PoolConfig::default())
        .await
        .context("connecting to database")?;
    store.bootstrap_schema().await.context("bootstrapping schema")?;
    let pool = store.pool().clone();

    let policy_json = std::fs::read_to_string(&args.policy)
        .with_context(|| format!("reading policy document from {}", args.policy.display()))?;
    let mut policy_document: PolicyDocument =
        serde_json::from_str(&policy_json).context("parsing policy document")?;
    for entry in &mut policy_document.purposes {
        for origin in &config.allowed_origins {
            if !entry.origin_allow_list.contains(origin) {
                entry.origin_allow_list.push(origin.clone());
            }
        }
    }
    let policy = PolicyEngine::new(&policy_document).context("compiling policy document")?;

    let receipt_secret = config.receipt_secret.as_bytes().to_vec();
    let webhook_decrypt_key = pbi_crypto::base64url_decode(&config.webhook_secret_key)
        .context("decoding webhookSecretKey")?;
    let export_signing_key = decode_ed25519_seed(&config.export_signing_private_key_pem)
        .context("decoding exportSigningPrivateKeyPem")?;

    let rate_limiter = Arc::new(pbi_ratelimit::RateLimiter::new(pbi_ratelimit::RateLimitConfig::new(
        config.rl_window_seconds,
        config.rl_max_requests,
    )));

    let state = AppState {
        pool: pool.clone(),
        policy: Arc::new(policy),
        policy_document: Arc::new(policy_document),
        receipt_secret: Arc::new(receipt_secret),
        webhook_decrypt_key: Arc::new(webhook_decrypt_key),
        export_signing_key: Arc::new(export_signing_key),
        export_public_key_pem: Arc::new(config.export_signing_public_key_pem.clone()),
        rate_limiter,
    };

    let cors = CorsConfig {
        allowed_origins: config.allowed_origins.clone(),
        allowed_methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
        allowed_headers: vec!["authorization".into(), "content-type".into()],
    };

    let app = build_app(state.clone(), cors);

    let cancel = pbi_cancel::CancelToken::new();
    let webhook_handle = spawn_webhook_worker(pool.clone(), state.webhook_decrypt_key.clone(), cancel.clone());

    let bind_addr = args.bind.clone().unwrap_or_else(|| format!("0.0.0.0:{}", config.port));
    let listener = tokio::net::TcpListener::bind(bind_addr.as_str())
        .await
        .with_context(|| format!("binding to {bind_addr}"))?;
    tracing::info!(%bind_addr, "pbid listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await
        .context("serving HTTP")?;

    webhook_handle.await.ok();
    store.close().await;
    Ok(())
}

fn spawn_webhook_worker(
    pool: sqlx::PgPool,
    decrypt_key: Arc<Vec<u8>>,
    cancel: pbi_cancel::CancelToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let http = reqwest::Client::new();
        let mut interval = tokio::time::interval(WEBHOOK_TICK_INTERVAL);
        loop {
            let tick = interval.tick();
            if cancel.race(tick).await.is_none() {
                break;
            }
            let outcome = cancel
                .race(pbi_webhook::tick(
                    &pool,
                    &http,
                    &decrypt_key,
                    WEBHOOK_BATCH_SIZE,
                    pbi_webhook::DEFAULT_MAX_ATTEMPTS,
                ))
                .await;
            match outcome {
                None => break,
                Some(Ok(results)) => {
                    if !results.is_empty() {
                        tracing::debug!(count = results.len(), "webhook tick completed");
                    }
                }
                Some(Err(e)) => tracing::warn!(error = %e, "webhook tick failed"),
            }
        }
        tracing::info!("webhook worker stopped");
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

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
    tracing::info!("shutdown signal received");
}

/// Decode the same raw-32-byte-PEM format `pbi-export` uses, but for the
/// signing key half of the pair (the public half is passed through
/// verbatim since `pbi_export::build_pack` only ever re-embeds it).
fn decode_ed25519_seed(pem: &str) -> Result<[u8; 32]> {
    let body: String = pem.lines().filter(|line| !line.starts_with("-----")).collect();
    let bytes = pbi_crypto::base64url_decode(&body)
        .or_else(|_| {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.decode(&body)
        })
        .context("export signing key is not valid base64")?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("export signing key must decode to 32 bytes, got {}", bytes.len()))
}
