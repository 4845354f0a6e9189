use tokio::sync::watch;

/// Cooperative cancellation, checked at suspension points.
///
/// One `CancelToken` fans out to any number of `CancelSignal` clones.
/// Cancellation is level-triggered and sticky: once fired it stays fired.
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation fires. Pending forever on a `never()`
    /// signal, so it is always safe inside `select!`.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Sender dropped without cancelling: park forever.
        std::future::pending::<()>().await;
    }

    /// A signal that never fires, for callers without a cancel path.
    pub fn never() -> Self {
        use std::sync::LazyLock;
        static NEVER: LazyLock<CancelSignal> = LazyLock::new(|| {
            let (tx, rx) = watch::channel(false);
            // Keep the channel open for the process lifetime.
            std::mem::forget(tx);
            CancelSignal { rx }
        });
        NEVER.clone()
    }
}
