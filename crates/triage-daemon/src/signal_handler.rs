use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::sync::Notify;
use tracing::info;

use crate::error::DaemonError;

pub trait ShutdownNotifier: Send + Sync {
    fn notify(&self);
}

pub type ShutdownNotifierHandle = Arc<dyn ShutdownNotifier>;

/// Wakes async tasks waiting on a `tokio::sync::Notify`.
impl ShutdownNotifier for Notify {
    fn notify(&self) {
        self.notify_waiters();
        self.notify_one();
    }
}

pub struct SignalHandler {
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl SignalHandler {
    /// Watch for SIGINT/SIGTERM on a dedicated thread. The first signal sets
    /// `shutdown` and fires `notifier`.
    pub fn setup(
        shutdown: Arc<AtomicBool>,
        notifier: Option<ShutdownNotifierHandle>,
    ) -> Result<Self, DaemonError> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;

        let handle = thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!(signal = sig, "Received signal, initiating graceful shutdown");
                    shutdown.store(true, Ordering::SeqCst);
                    if let Some(notifier) = notifier.as_ref() {
                        notifier.notify();
                    }
                }
            })
            .map_err(|e| DaemonError::SignalSetup(format!("failed to spawn signal handler: {}", e)))?;

        Ok(Self { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_wakes_pending_waiter() {
        let notify = Arc::new(Notify::new());
        let waiter = {
            let notify = Arc::clone(&notify);
            tokio::spawn(async move { notify.notified().await })
        };
        tokio::task::yield_now().await;

        let handle: ShutdownNotifierHandle = notify;
        handle.notify();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
