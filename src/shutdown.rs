//! A single graceful-shutdown signal shared by every long-running task
//! (integrator loop, publisher loop, follower loop, HTTP server).

use tokio::sync::watch;

/// Owned by whoever starts the process; call [`Shutdown::trigger`] on
/// Ctrl-C or SIGTERM.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// A cheaply cloneable handle a task holds to learn when to stop.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Marks every outstanding and future [`ShutdownSignal`] as cancelled.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Resolves once [`Shutdown::trigger`] has been called. Safe to await
    /// repeatedly and to select! against.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|v| *v).await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
