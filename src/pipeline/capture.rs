//! Capture bridge task - drains the slot ring and sends blocks to the router.
//!
//! The bridge is the ring's single consumer. It polls at a fixed interval
//! rather than being woken by the driver thread, so the callback never has
//! to touch the async runtime.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::SlotConsumer;
use crate::session::SessionState;
use crate::IqBlock;

/// How many blocks pass between progress log lines.
const PROGRESS_LOG_EVERY: u64 = 100;

/// Reads stored bursts and forwards them as [`IqBlock`]s.
pub(crate) struct CaptureBridge {
    consumer: SlotConsumer,
    block_tx: mpsc::Sender<IqBlock>,
    state: Arc<SessionState>,
    poll_interval: Duration,
}

impl CaptureBridge {
    pub(crate) fn new(
        consumer: SlotConsumer,
        block_tx: mpsc::Sender<IqBlock>,
        state: Arc<SessionState>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            consumer,
            block_tx,
            state,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Polls until the session stops, then drains what is left.
    pub(crate) async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state.running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !self.forward_available().await {
                tracing::debug!("router channel closed, capture bridge exiting");
                return;
            }
        }

        let remaining = self.consumer.available();
        self.forward_available().await;
        tracing::debug!(remaining, "capture bridge drained");
    }

    /// Forwards every stored burst. Returns `false` once the router is gone.
    async fn forward_available(&mut self) -> bool {
        while let Some(block) = self.consumer.try_pop() {
            self.update_session_stats(&block);
            if self.block_tx.send(block).await.is_err() {
                return false;
            }
        }
        true
    }

    fn update_session_stats(&self, block: &IqBlock) {
        self.state
            .bytes_forwarded
            .fetch_add(block.data.len() as u64, Ordering::SeqCst);
        let blocks = self.state.blocks_forwarded.fetch_add(1, Ordering::SeqCst) + 1;

        if blocks % PROGRESS_LOG_EVERY == 0 {
            tracing::debug!(
                blocks,
                sequence = block.sequence,
                backlog = self.consumer.available(),
                timestamp = ?block.timestamp,
                "capture bridge progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CallbackDispatcher;
    use crate::{FormatSet, SampleFormat, StreamState};

    #[tokio::test]
    async fn test_bridge_forwards_and_drains() {
        let stream = Arc::new(StreamState::new(SampleFormat::I16));
        let mut dispatcher = CallbackDispatcher::new(&stream).unwrap();
        stream
            .configure(FormatSet::single(SampleFormat::I16), 4, 8)
            .unwrap();
        stream.set_enabled(true).unwrap();
        for fill in 0..5u8 {
            dispatcher.dispatch(4, 0, 0.0, &[fill; 16]);
        }

        let state = Arc::new(SessionState::new());
        let (tx, mut rx) = mpsc::channel(16);
        let bridge = CaptureBridge::new(
            stream.take_consumer().unwrap(),
            tx,
            Arc::clone(&state),
            Duration::from_millis(1),
        );
        state.running.store(false, Ordering::SeqCst);
        bridge.run().await;

        let mut sequences = Vec::new();
        while let Ok(block) = rx.try_recv() {
            sequences.push(block.sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(state.blocks_forwarded.load(Ordering::SeqCst), 5);
        assert_eq!(state.bytes_forwarded.load(Ordering::SeqCst), 80);
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_bridge_exits_when_router_gone() {
        let stream = Arc::new(StreamState::new(SampleFormat::I16));
        let mut dispatcher = CallbackDispatcher::new(&stream).unwrap();
        stream
            .configure(FormatSet::single(SampleFormat::I16), 4, 4)
            .unwrap();
        stream.set_enabled(true).unwrap();
        dispatcher.dispatch(4, 0, 0.0, &[0; 16]);

        let state = Arc::new(SessionState::new());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let bridge = CaptureBridge::new(
            stream.take_consumer().unwrap(),
            tx,
            Arc::clone(&state),
            Duration::from_millis(1),
        );

        tokio::time::timeout(Duration::from_secs(1), bridge.run())
            .await
            .expect("bridge should exit once the router channel closes");
        assert!(state.running.load(Ordering::SeqCst));
    }
}
