//! Session liveness ticker.
//!
//! The heartbeat runs independently of transfer activity. Loss of the
//! channel is detected by the connection layer (close/error events), not
//! by timeout inference here — the ticker only proves we are alive. The
//! parting `Bye` is sent by the engine's shutdown path, not here, so a
//! peer-initiated session end is never answered with a `Bye` echo.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::channel::TransferChannel;
use crate::core::config::PING_INTERVAL;
use crate::core::protocol::ControlMessage;
use crate::utils::sos::SignalOfStop;

/// Spawn the heartbeat ticker: `Ping` every [`PING_INTERVAL`] until the
/// session token is cancelled.
pub fn spawn(channel: Arc<dyn TransferChannel>, sos: SignalOfStop) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        // The first tick fires immediately; skip it so pings start one
        // interval after session open.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if channel.send_control(&ControlMessage::Ping).is_err() {
                        debug!(event = "heartbeat_send_failed", "Channel refused ping, stopping heartbeat");
                        return;
                    }
                }
                _ = sos.wait() => {
                    debug!(event = "heartbeat_stopped", "Session over, heartbeat ticker exiting");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<ControlMessage>>,
    }

    impl TransferChannel for RecordingChannel {
        fn send_control(&self, msg: &ControlMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
        fn send_binary(&self, _payload: Bytes) -> Result<()> {
            Ok(())
        }
        fn buffered_amount(&self) -> usize {
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pings_until_cancelled() {
        let channel = Arc::new(RecordingChannel::default());
        let sos = SignalOfStop::new();
        let handle = spawn(channel.clone(), sos.clone());

        tokio::time::sleep(PING_INTERVAL * 3 + PING_INTERVAL / 2).await;
        sos.cancel();
        handle.await.unwrap();

        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| *m == ControlMessage::Ping));
    }
}
