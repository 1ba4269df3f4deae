//! Operator pause between nodes.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared pause flag. The dispatcher checks it before starting each node and
/// waits while it is set; a node already running is never interrupted.
#[derive(Debug, Clone)]
pub struct PauseSwitch {
    state: Arc<watch::Sender<bool>>,
}

impl PauseSwitch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn pause(&self) {
        self.state.send_replace(true);
    }

    pub fn resume(&self) {
        self.state.send_replace(false);
    }

    /// Flips the flag and returns whether the run is now paused.
    pub fn toggle(&self) -> bool {
        self.state.send_modify(|paused| *paused = !*paused);
        self.is_paused()
    }

    pub fn is_paused(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the switch is released. Returns `false` if `cancel` fired
    /// first.
    pub(crate) async fn wait_until_resumed(&self, cancel: &CancellationToken) -> bool {
        let mut updates = self.state.subscribe();
        loop {
            let paused = *updates.borrow_and_update();
            if !paused {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = updates.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }
}

impl Default for PauseSwitch {
    fn default() -> Self {
        Self::new()
    }
}
