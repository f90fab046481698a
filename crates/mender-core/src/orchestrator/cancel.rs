//! Caller-driven cancellation of a running flow.
//!
//! Cancellation is observed between stages only; a collaborator call that
//! is already running is allowed to finish.

use std::sync::Arc;

use tokio::sync::watch;

/// Creates a linked handle/token pair.
pub fn cancellation() -> (CancelHandle, FlowCancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, FlowCancellation { rx })
}

/// Held by the caller; cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Checked by the orchestrator before each stage.
#[derive(Debug, Clone)]
pub struct FlowCancellation {
    rx: watch::Receiver<bool>,
}

impl FlowCancellation {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
