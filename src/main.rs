use anyhow::Context;
use clap::Parser;
use mcp_resilience::logging::init_tracing;
use mcp_resilience::{
    CacheManager, CircuitState, Config, HealthCheckConfig, HealthMonitor, ResilienceExecutor,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Resilience core daemon: cache maintenance, health probes and periodic status reports
#[derive(Parser, Debug)]
#[command(name = "mcp-resilience", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `mcp_resilience=debug` (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Seconds between health and statistics reports
    #[arg(long, default_value_t = 60)]
    report_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    init_tracing(&config.logging)?;

    info!("Starting mcp-resilience v{}", env!("CARGO_PKG_VERSION"));

    let cache = CacheManager::new(config.cache.clone());
    let executor = ResilienceExecutor::from_config(&config)?;
    let monitor = HealthMonitor::new();

    for service in &config.health.services {
        monitor
            .register_service(HealthCheckConfig::from(service))
            .await
            .with_context(|| format!("failed to register health check for '{}'", service.service))?;
    }

    cache.start_cleanup_task().await;
    monitor.start_monitoring().await;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let mut ticker = interval(Duration::from_secs(cli.report_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => report(&cache, &executor, &monitor).await,
        }
    }

    info!("Shutting down");
    monitor.shutdown().await;
    cache.shutdown().await;
    report(&cache, &executor, &monitor).await;
    info!("Shutdown complete");

    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    wait_for_ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                () = wait_for_ctrl_c() => info!("Received Ctrl-C, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            wait_for_ctrl_c().await;
            info!("Received Ctrl-C, initiating graceful shutdown");
        }

        shutdown.cancel();
    });
}

async fn wait_for_ctrl_c() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn report(cache: &CacheManager, executor: &ResilienceExecutor, monitor: &HealthMonitor) {
    let health = monitor.get_system_health().await;
    let stats = cache.get_stats().await;
    let errors = executor.get_error_stats().await;

    info!(
        status = %health.status,
        services = health.total_services,
        healthy = health.healthy,
        degraded = health.degraded,
        unhealthy = health.unhealthy,
        average_uptime = health.average_uptime,
        "System health"
    );

    for service in health.services.iter().filter(|s| !s.status.is_operational()) {
        warn!(
            "Service '{}' is {} (uptime {:.1}%, error rate {:.1}%)",
            service.service, service.status, service.uptime, service.error_rate
        );
    }

    info!(
        entries = stats.total_entries,
        size_bytes = stats.total_size_bytes,
        hit_rate = stats.hit_rate,
        evictions = stats.evictions,
        "Cache statistics"
    );

    let open_circuits = errors
        .circuit_breakers
        .iter()
        .filter(|breaker| breaker.state != CircuitState::Closed)
        .count();
    if open_circuits > 0 {
        warn!("{} circuit breakers are not closed", open_circuits);
    }
}
