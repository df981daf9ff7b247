use crate::config::Config;
use crate::endpoint::TunnelEndpoint;
use crate::health::{HealthChecker, HealthState, NetworkProbe, Probe};
use crate::process::{ProcessError, ProcessHandle};
use crate::shutdown::Shutdown;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const READINESS_ATTEMPTS: u32 = 5;
pub const READINESS_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Start(#[from] ProcessError),
    #[error("tunnel on {endpoint} not reachable after {attempts} attempts")]
    TunnelNotReady {
        endpoint: TunnelEndpoint,
        attempts: u32,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Stopped,
    Starting,
    Running,
    Restarting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TunnelCommand {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.ssh_command.clone(),
            args: config.ssh_args(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub check_interval: Duration,
    pub stop_timeout: Duration,
    pub readiness_attempts: u32,
    pub readiness_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: config.check_interval,
            stop_timeout: config.stop_timeout,
            ..Self::default()
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            check_interval: crate::config::DEFAULT_CHECK_INTERVAL,
            stop_timeout: crate::config::DEFAULT_STOP_TIMEOUT,
            readiness_attempts: READINESS_ATTEMPTS,
            readiness_delay: READINESS_DELAY,
        }
    }
}

// ---------------------------------------------------------------------------
// TunnelSupervisor
// ---------------------------------------------------------------------------

/// Owns the tunnel process and keeps it healthy.
///
/// `process` is the only state shared with external stop requests. It is
/// locked to spawn or to stop, never across a health check.
pub struct TunnelSupervisor<P = NetworkProbe> {
    command: TunnelCommand,
    checker: HealthChecker<P>,
    settings: SupervisorSettings,
    process: Mutex<Option<ProcessHandle>>,
    state: watch::Sender<TunnelState>,
    spawns: AtomicU32,
    stops: AtomicU32,
    restarts: AtomicU32,
}

impl TunnelSupervisor<NetworkProbe> {
    pub fn from_config(config: &Config) -> Self {
        let checker = HealthChecker::new(
            NetworkProbe,
            config.endpoint.clone(),
            config.probe_url.clone(),
            config.port_check_timeout,
        );
        Self::new(
            TunnelCommand::from_config(config),
            checker,
            SupervisorSettings::from_config(config),
        )
    }
}

impl<P: Probe> TunnelSupervisor<P> {
    pub fn new(command: TunnelCommand, checker: HealthChecker<P>, settings: SupervisorSettings) -> Self {
        let (state, _) = watch::channel(TunnelState::Stopped);
        Self {
            command,
            checker,
            settings,
            process: Mutex::new(None),
            state,
            spawns: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            restarts: AtomicU32::new(0),
        }
    }

    pub fn endpoint(&self) -> &TunnelEndpoint {
        self.checker.endpoint()
    }

    pub fn checker(&self) -> &HealthChecker<P> {
        &self.checker
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// Processes spawned so far.
    pub fn spawn_count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Running processes stopped so far.
    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        let mut process = self.process.lock().await;
        process.as_mut().is_some_and(|handle| handle.is_running())
    }

    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|h| h.pid())
    }

    pub async fn started_at(&self) -> Option<DateTime<Local>> {
        self.process.lock().await.as_ref().map(|h| h.started_at())
    }

    /// Spawns the tunnel unless a live process already exists, then polls the
    /// local port until it accepts connections. On `TunnelNotReady` the new
    /// process is kept; the next health cycle deals with it.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        {
            let mut process = self.process.lock().await;
            if let Some(handle) = process.as_mut()
                && handle.is_running()
            {
                tracing::info!(pid = ?handle.pid(), "tunnel process is already running");
                return Ok(());
            }
            self.spawn_locked(&mut process).await?;
        }

        self.wait_until_ready().await
    }

    /// Replaces whatever is in `process` with a fresh child. The caller holds
    /// the process lock for the whole call.
    async fn spawn_locked(&self, process: &mut Option<ProcessHandle>) -> Result<(), SupervisorError> {
        // Reap a process that exited behind our back
        if let Some(exited) = process.take() {
            let pid = exited.pid();
            let status = exited.stop(self.settings.stop_timeout).await;
            tracing::warn!(pid = ?pid, status = ?status, "tunnel process had exited");
        }

        self.state.send_replace(TunnelState::Starting);
        tracing::info!(
            program = %self.command.program,
            args = ?self.command.args,
            "starting tunnel process"
        );
        let handle = match ProcessHandle::start(&self.command.program, &self.command.args) {
            Ok(handle) => handle,
            Err(e) => {
                self.state.send_replace(TunnelState::Stopped);
                return Err(e.into());
            }
        };
        tracing::info!(pid = ?handle.pid(), "tunnel process spawned");
        self.spawns.fetch_add(1, Ordering::SeqCst);
        *process = Some(handle);
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), SupervisorError> {
        let attempts = self.settings.readiness_attempts.max(1);
        for attempt in 1..=attempts {
            if self.checker.port_reachable().await {
                tracing::info!(attempt, "tunnel is ready");
                self.mark_running();
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.readiness_delay).await;
            }
        }

        self.mark_running();
        Err(SupervisorError::TunnelNotReady {
            endpoint: self.endpoint().clone(),
            attempts,
        })
    }

    /// Only a start still in progress becomes `Running`. A stop that ran
    /// during the readiness poll has already taken the process and set
    /// `Stopped`.
    fn mark_running(&self) {
        self.state.send_if_modified(|state| {
            if *state == TunnelState::Starting {
                *state = TunnelState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Stops the process if there is one. Calling it again is a no-op.
    pub async fn stop(&self) {
        self.stop_process().await;
        self.state.send_replace(TunnelState::Stopped);
    }

    async fn stop_process(&self) {
        let mut process = self.process.lock().await;
        self.stop_locked(&mut process).await;
    }

    async fn stop_locked(&self, process: &mut Option<ProcessHandle>) {
        let Some(mut handle) = process.take() else {
            return;
        };

        let pid = handle.pid();
        if !handle.is_running() {
            tracing::debug!(pid = ?pid, "tunnel process already exited");
            handle.stop(self.settings.stop_timeout).await;
            return;
        }

        tracing::info!(pid = ?pid, "stopping tunnel process");
        let uptime = handle.uptime();
        let status = handle.stop(self.settings.stop_timeout).await;
        self.stops.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            pid = ?pid,
            uptime_secs = uptime.as_secs(),
            status = ?status,
            "tunnel process stopped"
        );
    }

    /// Stop and respawn happen under one hold of the process lock, so a
    /// concurrent `stop()` sees either the old process or the new one, never
    /// the gap between them.
    pub async fn restart(&self) -> Result<(), SupervisorError> {
        {
            let mut process = self.process.lock().await;
            self.state.send_replace(TunnelState::Restarting);
            self.stop_locked(&mut process).await;
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.spawn_locked(&mut process).await?;
        }

        self.wait_until_ready().await
    }

    /// One full health check, restarting on failure. Restart errors are
    /// logged; the next cycle retries.
    pub async fn run_cycle(&self) -> HealthState {
        let health = self.checker.check().await;
        if health.is_healthy() {
            tracing::debug!("tunnel is healthy");
            return health;
        }

        tracing::warn!(health = ?health, "tunnel is unhealthy, restarting");
        if let Err(e) = self.restart().await {
            tracing::error!(error = %e, "failed to restart tunnel");
        }
        health
    }

    /// Runs health cycles every `check_interval` until `shutdown` fires, then
    /// stops the process. Shutdown is only observed between cycles.
    pub async fn run(&self, mut shutdown: Shutdown) {
        tracing::info!(
            endpoint = %self.endpoint(),
            interval_secs = self.settings.check_interval.as_secs_f64(),
            "supervising tunnel"
        );

        let period = self.settings.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        self.stop().await;
    }
}
