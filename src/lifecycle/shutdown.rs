//! Shutdown coordination.
//!
//! A bailout fault and an OS signal both end the process through the same
//! coordinator; only the reason (and so the exit code) differs.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// Exit status asking the process supervisor to replace this worker.
pub const BAILOUT_EXIT_CODE: i32 = 70;

/// Why the process is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM.
    Signal,
    /// An untrusted handler fault that warrants process-level remediation.
    Bailout { request_id: String, message: String },
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal => 0,
            ShutdownReason::Bailout { .. } => BAILOUT_EXIT_CODE,
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
/// The first reason triggered wins; later triggers are ignored.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<ShutdownReason>,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.tx.subscribe()
    }

    /// Trigger shutdown. Returns false if it was already triggered.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        {
            let mut slot = self.reason.lock().expect("shutdown mutex poisoned");
            if slot.is_some() {
                tracing::debug!(reason = ?reason, "Shutdown already in progress");
                return false;
            }
            *slot = Some(reason.clone());
        }
        tracing::info!(reason = ?reason, "Shutdown triggered");
        let _ = self.tx.send(reason);
        true
    }

    /// The reason shutdown was triggered, if it has been.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().expect("shutdown mutex poisoned").clone()
    }

    /// Resolve once shutdown is triggered.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.subscribe();
        if let Some(reason) = self.reason() {
            return reason;
        }
        match rx.recv().await {
            Ok(reason) => reason,
            Err(_) => self.reason().unwrap_or(ShutdownReason::Signal),
        }
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
