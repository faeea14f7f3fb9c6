//! Cooperative interruption shared by the signal listener and runners.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot interruption flag that any number of tasks can await.
///
/// Cloning shares the flag. Once triggered it stays triggered.
#[derive(Clone, Debug)]
pub struct Interrupt {
    state: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    /// Creates an untriggered flag.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Marks the flag as triggered and wakes every waiter.
    pub fn trigger(&self) {
        self.state.send_replace(true);
    }

    /// Returns `true` once [`Interrupt::trigger`] has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the flag is triggered, immediately if it already is.
    pub async fn triggered(&self) {
        let mut updates = self.state.subscribe();
        // The sender lives in `self`, so waiting cannot observe a closed channel.
        updates.wait_for(|triggered| *triggered).await.ok();
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
