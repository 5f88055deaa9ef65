//! Timers owned by the round currently being played.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::rounds::Timer;
use crate::session::SessionCommand;

/// Pending timer tasks of one round. Each fires by sending
/// [`SessionCommand::Timer`] tagged with the round's epoch; dropping the set
/// aborts whatever has not fired yet.
pub struct Timers {
    epoch: u64,
    cmd_tx: mpsc::WeakSender<SessionCommand>,
    handles: Vec<AbortHandle>,
}

impl Timers {
    pub fn new(epoch: u64, cmd_tx: mpsc::WeakSender<SessionCommand>) -> Self {
        Self {
            epoch,
            cmd_tx,
            handles: Vec::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.handles.retain(|handle| !handle.is_finished());

        let epoch = self.epoch;
        let cmd_tx = self.cmd_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // the session is gone if every strong sender was dropped
            if let Some(tx) = cmd_tx.upgrade() {
                let _ = tx.send(SessionCommand::Timer { epoch, timer }).await;
            }
        });
        self.handles.push(task.abort_handle());
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
