use std::{
    sync::{
        Weak,
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use crate::{Clock, EscalatingLocalRateLimiter};

/// Handle to a running cleanup loop. Dropping it without [`stop`](Self::stop) also ends
/// a thread-backed loop at its next tick.
pub(crate) enum CleanupLoop {
    Thread {
        stop_tx: mpsc::Sender<()>,
        handle: thread::JoinHandle<()>,
    },
    #[cfg(feature = "tokio")]
    Task(tokio::task::JoinHandle<()>),
}

impl CleanupLoop {
    /// Sweep `limiter` now and then every `interval` until stopped or the limiter is dropped.
    ///
    /// Runs as a Tokio task when the `tokio` feature is enabled and a runtime is in scope,
    /// on a dedicated thread otherwise. Returns `None` if the thread could not be spawned.
    ///
    /// `interval` is raised to at least 1 ms.
    pub(crate) fn spawn<C>(
        limiter: Weak<EscalatingLocalRateLimiter<C>>,
        interval: Duration,
    ) -> Option<Self>
    where
        C: Clock + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));

        #[cfg(feature = "tokio")]
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            return Some(Self::Task(handle.spawn(run_task(limiter, interval))));
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("tierlimit-cleanup".to_string())
            .spawn(move || {
                while sweep(&limiter) {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                tracing::debug!("cleanup loop stopped");
            });

        match spawned {
            Ok(handle) => Some(Self::Thread { stop_tx, handle }),
            Err(err) => {
                tracing::error!(error = ?err, "Failed to spawn cleanup thread");
                None
            }
        }
    } // end method spawn

    /// Whether the loop has ended on its own, e.g. because the Tokio runtime it was
    /// spawned on shut down.
    pub(crate) fn is_finished(&self) -> bool {
        match self {
            Self::Thread { handle, .. } => handle.is_finished(),
            #[cfg(feature = "tokio")]
            Self::Task(task) => task.is_finished(),
        }
    }

    /// End the loop. A sweep already in progress runs to completion.
    pub(crate) fn stop(self) {
        match self {
            Self::Thread { stop_tx, .. } => drop(stop_tx),
            #[cfg(feature = "tokio")]
            Self::Task(task) => task.abort(),
        }
    }
}

#[cfg(feature = "tokio")]
async fn run_task<C>(limiter: Weak<EscalatingLocalRateLimiter<C>>, interval: Duration)
where
    C: Clock + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !sweep(&limiter) {
            tracing::debug!("cleanup loop stopped");
            break;
        }
    }
}

/// Run one sweep. `false` once the limiter has been dropped.
fn sweep<C: Clock>(limiter: &Weak<EscalatingLocalRateLimiter<C>>) -> bool {
    let Some(limiter) = limiter.upgrade() else {
        return false;
    };

    limiter.cleanup();
    true
}
