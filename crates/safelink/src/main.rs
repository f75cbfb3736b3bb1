//! safelink: signed-redirect gating service — HMAC link signing, rule
//! evaluation, and weighted/duty-cycled target selection.

mod config;
mod error;
mod link;
mod rules;
mod select;
mod server;
mod signing;
mod stats;
mod store;
mod variant;

use config::SafelinkConfig;
use server::AppState;
use stats::DecisionStats;
use store::MuteStateStore;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("SAFELINK_CONFIG").ok())
        .unwrap_or_else(|| "safelink.toml".to_string());

    let secret_override = args
        .iter()
        .position(|a| a == "--secret")
        .and_then(|i| args.get(i + 1).cloned());

    let state_file_override = args
        .iter()
        .position(|a| a == "--state-file")
        .and_then(|i| args.get(i + 1).cloned());

    // Load configuration
    let mut config = SafelinkConfig::load(&config_path)?;

    // Apply CLI overrides (take precedence over TOML and env vars)
    if secret_override.is_some() {
        config.signing.secret = secret_override;
    }
    if let Some(path) = state_file_override {
        config.storage.state_file = path;
    }

    // Bad secrets and malformed targets must fail loudly at startup
    config.validate()?;

    // Build the tokio runtime first — tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let _tracing_guard = safelink_tracing::init_tracing(&config.tracing);

        if config.signing.is_placeholder() {
            tracing::warn!(
                "no signing secret configured; using the insecure all-zero placeholder — \
                 set signing.secret (or --secret) in production"
            );
        }

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            rule_type = %config.routing.rule_type,
            targets = config.routing.targets.len(),
            state_file = %config.storage.state_file,
            "Starting safelink"
        );

        run(config).await
    })
}

async fn run(config: SafelinkConfig) -> anyhow::Result<()> {
    let store = MuteStateStore::new(&config.storage.state_file);
    let stats = DecisionStats::new();

    let state = AppState {
        config,
        store,
        stats,
    };

    server::run(state).await
}
