//! Scheduled token refresh.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use super::{SessionInner, SessionManager, SessionState};

/// Owns the background refresh task. Dropping it stops the schedule.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub(super) const fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop the schedule.
    pub fn cancel(self) {
        drop(self);
    }

    /// Whether the task has stopped, by cancellation or sign-out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Refresh every `period` until the session is signed out or the manager
/// is dropped. The first refresh fires one full period after start.
pub(super) async fn run(
    manager: Weak<SessionInner>,
    mut state: watch::Receiver<SessionState>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = manager.upgrade() else {
                    debug!("session manager dropped; stopping token refresh");
                    break;
                };
                let manager = SessionManager { inner };
                if manager.state() == SessionState::Unauthenticated {
                    break;
                }
                if let Err(e) = manager.refresh_token().await {
                    warn!(error = %e, "scheduled token refresh failed");
                }
                if manager.state() == SessionState::Unauthenticated {
                    break;
                }
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == SessionState::Unauthenticated {
                    break;
                }
            }
        }
    }

    debug!("token refresh schedule stopped");
}
