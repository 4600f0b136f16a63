use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hardened_api::lifecycle::fault_channel;
use hardened_api::{
    AppResult, AppState, Config, Environment, ResourceTracker, Server, ShutdownController,
    ShutdownTrigger, build_router, utils,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    let (environment, log_level) = match &config {
        Ok(config) => (config.environment, config.log_level.clone()),
        Err(_) => (Environment::default(), "info".to_string()),
    };
    init_tracing(environment, &log_level);

    info!("Starting Hardened API v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Human-readable logs in development, one JSON object per line in production.
fn init_tracing(environment: Environment, log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if environment.is_production() {
        builder.json().with_current_span(false).init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: AppResult<Config>) -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = config.map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = config.port,
        environment = %config.environment,
        "Configuration loaded"
    );

    // Lifecycle
    let tracker = Arc::new(ResourceTracker::with_cleanup(|| async {
        info!("Releasing application resources");
        Ok(())
    }));
    let controller = Arc::new(ShutdownController::new(
        tracker.clone(),
        config.shutdown_timeout,
    ));
    let (faults, mut fault_rx) = fault_channel();

    // Bind before building state so a taken port fails fast
    let server = Server::bind(&config).await.map_err(|e| {
        error!("Failed to bind to {}: {e}", config.server_addr());
        exitcode::UNAVAILABLE
    })?;
    let addr = server.local_addr().map_err(|e| {
        error!("Failed to read listener address: {e}");
        exitcode::OSERR
    })?;
    let scheme = if server.is_tls() { "https" } else { "http" };

    // Build application state and router
    let state = AppState::new(config, tracker.clone()).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    state.spawn_housekeeping(&faults);
    let app = build_router(state);

    info!("Server listening on {scheme}://{addr}");
    info!("API endpoints:");
    info!("  GET    /health           - Health check");
    info!("  GET    /api/users        - List users (paginated)");
    info!("  POST   /api/users        - Create user");
    info!("  GET    /api/users/{{id}}   - Get user");
    info!("  PUT    /api/users/{{id}}   - Update user");
    info!("  DELETE /api/users/{{id}}   - Delete user");
    info!("  GET    /api/items/{{id}}   - Get item");
    info!("  POST   /api/contact      - Submit contact form");

    faults.spawn_supervised("http-server", server.run(app, controller.clone()));

    // Wait for the first trigger
    let trigger = tokio::select! {
        name = utils::shutdown_signal() => ShutdownTrigger::Signal(name),
        Some(fault) = fault_rx.recv() => ShutdownTrigger::Fault(fault.to_string()),
    };

    // Later signals reach the controller too and are ignored there
    tokio::spawn({
        let controller = controller.clone();
        async move {
            loop {
                let name = utils::shutdown_signal().await;
                controller.shutdown(ShutdownTrigger::Signal(name)).await;
            }
        }
    });

    let Some(report) = controller.shutdown(trigger).await else {
        warn!("Shutdown was already running");
        return Err(exitcode::SOFTWARE);
    };

    info!(
        connections_closed = report.connections_closed,
        timers_cleared = report.timers_cleared,
        "Server shutdown complete"
    );

    match report.exit_code() {
        exitcode::OK => Ok(()),
        code => Err(code),
    }
}
