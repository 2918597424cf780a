//! Presence keepalive.
//!
//! While logged in the client periodically re-announces itself as online.
//! The task is owned by a [`Heartbeat`] guard: stopping it (or dropping the
//! guard) guarantees no further status message is sent.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_shared::types::UserId;

use crate::error::SendError;
use crate::sender::OutboundSender;

pub struct Heartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(sender: OutboundSender, user_id: UserId, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match sender.send_status(user_id, true).await {
                            Ok(()) | Err(SendError::NotConnected) => {}
                            Err(e) => warn!(user = %user_id, error = %e, "Heartbeat send failed"),
                        }
                    }
                }
            }
            debug!(user = %user_id, "Heartbeat stopped");
        });

        debug!(user = %user_id, interval_ms = interval.as_millis() as u64, "Heartbeat started");
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait up to `timeout` for it to finish.
    pub async fn stop(mut self, timeout: Duration) {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!("Heartbeat did not stop in time, aborting");
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use parley_net::TransportCommand;

    use super::*;
    use crate::sender::Writer;

    fn attached() -> (OutboundSender, mpsc::Receiver<TransportCommand>) {
        let (tx, rx) = mpsc::channel(64);
        let sender = OutboundSender::new();
        sender.attach(Writer {
            generation: 1,
            commands: tx,
            user_id: Some(UserId(9)),
            username: None,
        });
        (sender, rx)
    }

    #[tokio::test]
    async fn test_sends_status_every_interval() {
        let (sender, mut rx) = attached();
        let heartbeat = Heartbeat::start(sender, UserId(9), Duration::from_millis(20));

        // First tick fires immediately, then once per interval.
        tokio::time::sleep(Duration::from_millis(70)).await;
        heartbeat.stop(Duration::from_secs(1)).await;

        let mut sent = 0;
        while let Ok(TransportCommand::Send(frame)) = rx.try_recv() {
            assert_eq!(frame.get("destination"), Some("/app/user.status"));
            let body: serde_json::Value = serde_json::from_slice(&frame.body).unwrap();
            assert_eq!(body["userId"], 9);
            assert_eq!(body["isOnline"], true);
            sent += 1;
        }
        assert!(sent >= 2, "only {sent} heartbeats sent");
    }

    #[tokio::test]
    async fn test_nothing_sent_after_stop() {
        let (sender, mut rx) = attached();
        let heartbeat = Heartbeat::start(sender, UserId(9), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(15)).await;
        heartbeat.stop(Duration::from_secs(1)).await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels_task() {
        let (sender, mut rx) = attached();
        let heartbeat = Heartbeat::start(sender, UserId(9), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(15)).await;
        drop(heartbeat);
        tokio::time::sleep(Duration::from_millis(10)).await;
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
