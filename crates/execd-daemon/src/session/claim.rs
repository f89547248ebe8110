//! One-shot "stream claimed" event.

use tokio::sync::watch;

/// Fires once, when a caller attaches to a declared output stream.
///
/// `Wait` blocks on this before draining relays, so a process whose output
/// nobody has attached to yet cannot be reported as finished.
#[derive(Debug)]
pub struct ClaimSignal {
    tx: watch::Sender<bool>,
}

impl ClaimSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired (immediately if it already has).
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        // `self` owns the sender, so the channel stays open for the whole wait.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ClaimSignal {
    fn default() -> Self {
        Self::new()
    }
}
