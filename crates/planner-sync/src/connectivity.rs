//! Periodic background drain timer.
//!
//! Ticks every `interval` until stopped. A tick that is already running when
//! [`DrainTimer::stop`] is called runs to completion; the loop only checks
//! for shutdown between ticks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

/// Handle to a running drain timer. Dropping it stops the timer.
pub struct DrainTimer {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl DrainTimer {
    /// Spawn the timer loop.
    ///
    /// `tick` runs after each interval. Returning `false` ends the loop, for
    /// example when the owner has gone away.
    pub fn start<F, Fut>(interval: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            info!(
                subsystem = "sync",
                component = "drain_timer",
                interval_secs = interval.as_secs(),
                "Drain timer started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(interval) => {
                        debug!(subsystem = "sync", component = "drain_timer", "Drain timer tick");
                        if !tick().await {
                            break;
                        }
                    }
                }
            }

            info!(subsystem = "sync", component = "drain_timer", "Drain timer stopped");
        });

        Self { shutdown_tx, task }
    }

    /// Signal the loop to stop after any in-flight tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for DrainTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
