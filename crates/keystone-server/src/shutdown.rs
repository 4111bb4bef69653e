//! Graceful shutdown.
//!
//! [`ShutdownSignal`] is a cloneable latch: once triggered, every current and
//! future waiter resolves. [`ConnectionTracker`] counts in-flight connections
//! so the server can drain them before returning.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot, cloneable shutdown latch.
///
/// ```
/// use keystone_server::ShutdownSignal;
///
/// # tokio_test::block_on(async {
/// let shutdown = ShutdownSignal::new();
/// let waiter = shutdown.clone();
/// shutdown.trigger();
/// waiter.wait().await;
/// assert!(waiter.is_shutdown());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Creates a signal that also fires on SIGINT/SIGTERM (ctrl-c elsewhere).
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });
        signal
    }

    /// Fires the signal. Later calls are no-ops.
    pub fn trigger(&self) {
        let fired = self.state.send_if_modified(|triggered| !std::mem::replace(triggered, true));
        if fired {
            tracing::info!("Shutdown triggered");
        }
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut term), Ok(mut int)) => {
                tokio::select! {
                    _ = term.recv() => tracing::info!("Received SIGTERM"),
                    _ = int.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "Signal handlers unavailable, falling back to ctrl-c");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received ctrl-c"),
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

/// Counts in-flight connections.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    /// Registers a connection until the returned guard drops.
    #[must_use]
    pub fn acquire(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Connections currently registered.
    #[must_use]
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves when no connections remain.
    pub async fn drained(&self) {
        let mut receiver = self.active.subscribe();
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one connection registered with a [`ConnectionTracker`].
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
    }
}
