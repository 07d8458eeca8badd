use gate_service::{
    build_router,
    config::GateConfig,
    services::{ExpirySweeper, InvitationNotifier, LogNotifier, PgStore, SmtpNotifier},
    utils::Argon2Hasher,
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_tracing, install_metrics_recorder};
use service_core::shutdown::shutdown_signal;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on bad configuration
    let config = GateConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    let metrics = install_metrics_recorder()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting gate service"
    );

    let store = PgStore::connect(&config.database).await?;
    store.run_migrations().await?;
    let store = Arc::new(store);

    let notifier: Arc<dyn InvitationNotifier> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            tracing::warn!("SMTP_HOST not set, invitation reminders will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState::new(
        config.clone(),
        store.clone(),
        Arc::new(Argon2Hasher),
        Some(metrics),
    )?;

    let shutdown = CancellationToken::new();

    let sweeper = ExpirySweeper::new(
        store,
        notifier,
        config.invitation.sweep_interval(),
        config.invitation.resend_grace(),
    );
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let limiter = state.gate.limiter().clone();
    let eviction_interval = config.rate_limit.eviction_interval();
    let eviction_shutdown = shutdown.clone();
    let eviction_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(eviction_interval);
        loop {
            tokio::select! {
                _ = eviction_shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let remaining = limiter.evict_idle();
                    tracing::debug!(remaining, "Evicted idle rate limiter buckets");
                }
            }
        }
    });

    let app = build_router(state);

    let addr: SocketAddr = config
        .common
        .listen_addr()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Listening");

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = server_shutdown.cancelled() => {}
        }
        server_shutdown.cancel();
    })
    .await?;

    // The server can also stop on its own; make sure the background tasks follow.
    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        tracing::error!(error = %e, "Sweeper task panicked");
    }
    if let Err(e) = eviction_task.await {
        tracing::error!(error = %e, "Eviction task panicked");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
