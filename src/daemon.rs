use crate::config::Config;
use crate::health::Probe;
use crate::lock::SingletonGuard;
use crate::logging;
use crate::paths::Paths;
use crate::shutdown::{Shutdown, ShutdownCoordinator};
use crate::supervisor::{SupervisorError, TunnelSupervisor};

/// Runs one supervised tunnel until SIGINT/SIGTERM.
///
/// Errors returned from here are fatal-at-startup: log file, lock conflict,
/// signal handlers, or an SSH client that cannot be spawned at all.
pub async fn run(config: Config) -> color_eyre::Result<()> {
    let paths = Paths::new(&config);
    // Before the lock, which logs stale reclaims
    let _log_guard = logging::init_logging(paths.log_file(), &config.log_level)?;
    let mut lock = match SingletonGuard::acquire(&config.endpoint, paths.lock_file()) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(error = %e, "failed to acquire lock");
            return Err(e.into());
        }
    };

    tracing::info!(
        endpoint = %config.endpoint,
        pid = lock.pid(),
        lock_file = %paths.lock_file().display(),
        "starting ssh tunnel supervisor"
    );

    let coordinator = ShutdownCoordinator::new();
    coordinator.listen_for_signals()?;

    let supervisor = TunnelSupervisor::from_config(&config);
    let result = supervise(&supervisor, coordinator.subscribe()).await;

    if let Err(e) = lock.release() {
        tracing::error!(path = %paths.lock_file().display(), error = %e, "failed to remove lock file");
    }
    match &result {
        Ok(()) => tracing::info!("shutdown complete"),
        Err(e) => tracing::error!(error = %e, "supervisor failed to start"),
    }

    result?;
    Ok(())
}

/// Initial start followed by the health loop. Only a failure to spawn the
/// client is fatal; a tunnel that is slow to come up is left to the loop.
pub async fn supervise<P: Probe>(
    supervisor: &TunnelSupervisor<P>,
    shutdown: Shutdown,
) -> Result<(), SupervisorError> {
    match supervisor.start().await {
        Ok(()) => {}
        Err(e @ SupervisorError::Start(_)) => return Err(e),
        Err(e) => {
            tracing::error!(error = %e, "tunnel not ready, health checks will retry");
        }
    }

    supervisor.run(shutdown).await;
    Ok(())
}
