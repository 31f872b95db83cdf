// ============================
// crates/backend-lib/src/timer.rs
// ============================
//! Cancelable delayed delivery into an actor mailbox.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A message scheduled for later delivery. Dropping it cancels delivery.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    /// Deliver `msg` to `mailbox` after `delay` unless canceled first.
    /// Cancelling `parent` cancels the task too.
    pub fn schedule<T>(
        delay: Duration,
        mailbox: mpsc::Sender<T>,
        msg: T,
        parent: &CancellationToken,
    ) -> Self
    where
        T: Send + 'static,
    {
        let token = parent.child_token();
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {},
                () = tokio::time::sleep(delay) => {
                    // mailbox gone means the actor already stopped
                    let _ = mailbox.send(msg).await;
                },
            }
        });
        Self { token }
    }

}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
