//! Reconnect policy layered on top of a [`ChannelManager`].
//!
//! The manager itself never reconnects; this task watches its state and calls `connect` again
//! after a failure, with exponential backoff. An explicit close ends the task.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::channel::manager::ChannelManager;
use crate::channel::state::ConnectionState;
use crate::config::ReconnectConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive attempts before giving up. None = forever.
    pub max_attempts: Option<u32>,
}

impl Backoff {
    /// Delay before attempt number `attempt` (0-based): initial * 2^attempt, capped at max.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(c: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(c.initial_delay_ms),
            max: Duration::from_millis(c.max_delay_ms.max(c.initial_delay_ms)),
            max_attempts: c.max_attempts,
        }
    }
}

/// Watch `manager` and reconnect to `endpoint` whenever it fails.
pub fn spawn_reconnect(
    manager: Arc<ChannelManager>,
    endpoint: String,
    backoff: Backoff,
) -> JoinHandle<()> {
    let mut state_rx = manager.watch_state();
    tokio::spawn(async move {
        let mut attempts: u32 = 0;
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Open => attempts = 0,
                ConnectionState::Closing | ConnectionState::Closed => {
                    log::debug!("hub reconnect: channel closed, stopping");
                    return;
                }
                ConnectionState::Failed => {
                    if backoff.exhausted(attempts) {
                        log::warn!("hub reconnect: giving up after {} attempts", attempts);
                        return;
                    }
                    let delay = backoff.delay(attempts);
                    attempts += 1;
                    log::info!(
                        "hub reconnect: attempt {} in {} ms",
                        attempts,
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            // retry refuses anything but Failed, so a close during the
                            // wait is never undone
                            if let Err(e) = manager.retry(&endpoint) {
                                log::debug!("hub reconnect: skipped: {}", e);
                            }
                        }
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                    continue;
                }
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    })
}
