use std::sync::Arc;

use anyhow::Context;

use streamer_ratings::api::api_routes;
use streamer_ratings::catalog::CatalogService;
use streamer_ratings::channels::{ChannelManager, CliChannel, TelegramChannel};
use streamer_ratings::config::AppConfig;
use streamer_ratings::dialogue::{DialogueEngine, dispatcher};
use streamer_ratings::store::{Database, LibSqlBackend};
use streamer_ratings::verify::{FollowerVerifier, TwitchVerifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export TWITCH_CLIENT_ID=... TWITCH_CLIENT_SECRET=...");
            std::process::exit(1);
        }
    };

    eprintln!("🎬 Streamer Ratings v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/creators", config.http_port);
    eprintln!(
        "   Creators need {} followers (verify timeout {}s)",
        config.dialogue.min_followers,
        config.dialogue.verify_timeout.as_secs()
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Verification + catalog ───────────────────────────────────────────
    let verifier: Arc<dyn FollowerVerifier> = Arc::new(
        TwitchVerifier::new(config.twitch.clone()).context("building Twitch client")?,
    );
    let catalog = Arc::new(CatalogService::new(
        Arc::clone(&db),
        verifier,
        config.dialogue.clone(),
    ));

    // Spawn the companion API server
    let app = api_routes(Arc::clone(&catalog));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("binding API port {}", config.http_port))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "API server stopped");
        }
    });
    tracing::info!(port = config.http_port, "API server started");

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if let Some(telegram) = config.telegram.clone() {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if telegram.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                telegram.allowed_users.join(", ")
            }
        );
        channels.add(Arc::new(TelegramChannel::new(telegram)));
    }
    if config.cli_enabled {
        channels.add(Arc::new(CliChannel::new()));
    }

    if channels.is_empty() {
        eprintln!("   Channels: none (set TELEGRAM_BOT_TOKEN or STREAMER_RATINGS_CLI=1)");
        eprintln!("   Serving the API only. Ctrl-C to exit.\n");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }
    eprintln!("   Channels: {}\n", channels.names().join(", "));

    for (name, health) in channels.health_check_all().await {
        if let Err(e) = health {
            tracing::warn!(channel = %name, error = %e, "Channel health check failed");
        }
    }

    let channels = Arc::new(channels);
    let engine = Arc::new(DialogueEngine::new(catalog));

    tokio::select! {
        result = dispatcher::run(
            Arc::clone(&channels),
            engine,
            config.dialogue.session_idle_timeout,
        ) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            channels.shutdown_all().await;
        }
    }

    Ok(())
}
