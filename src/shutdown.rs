use std::io;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Turns SIGINT/SIGTERM into a one-shot cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving side of the cancellation flag, observed at loop boundaries.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Installs the signal handlers now, so a failure surfaces at startup,
    /// and spawns the listener task.
    pub fn listen_for_signals(&self) -> io::Result<JoinHandle<()>> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let coordinator = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = sigterm.recv() => match received {
                        Some(()) => "SIGTERM",
                        None => break,
                    },
                    received = sigint.recv() => match received {
                        Some(()) => "SIGINT",
                        None => break,
                    },
                };

                if coordinator.trigger() {
                    tracing::info!(signal = name, "received signal, shutting down");
                } else {
                    tracing::debug!(signal = name, "shutdown already in progress");
                }
            }
        }))
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested. Never resolves if the
    /// coordinator is dropped without triggering.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_one_shot() {
        let coordinator = ShutdownCoordinator::new();
        let shutdown = coordinator.subscribe();
        assert!(!shutdown.is_triggered());

        assert!(coordinator.trigger());
        assert!(!coordinator.trigger());
        assert!(coordinator.is_triggered());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut shutdown = coordinator.subscribe();

        let waiter = tokio::spawn(async move {
            shutdown.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        coordinator.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_trigger_sees_flag() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();

        let mut late = coordinator.subscribe();
        tokio::time::timeout(Duration::from_secs(1), late.cancelled())
            .await
            .expect("late subscriber missed shutdown");
    }

    #[tokio::test]
    async fn test_dropped_coordinator_never_cancels() {
        let coordinator = ShutdownCoordinator::new();
        let mut shutdown = coordinator.subscribe();
        drop(coordinator);

        let result = tokio::time::timeout(Duration::from_millis(100), shutdown.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut shutdown = coordinator.subscribe();
        let _listener = coordinator.listen_for_signals().unwrap();

        let me = nix::unistd::Pid::this();
        nix::sys::signal::kill(me, nix::sys::signal::Signal::SIGTERM).unwrap();
        tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
            .await
            .expect("SIGTERM did not trigger shutdown");

        // A second request changes nothing
        nix::sys::signal::kill(me, nix::sys::signal::Signal::SIGINT).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.is_triggered());
    }
}
