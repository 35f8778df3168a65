//! Live IQ delivery over a tokio mpsc channel.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::sink::Sink;
use crate::{FormatSet, IqBlock, SampleFormat, SinkError};

/// What a [`ChannelSink`] does when its receiver has fallen behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Wait for room. The router stalls, and if the receiver never catches
    /// up the slot ring overruns instead.
    #[default]
    Wait,
    /// Drop the newest block and keep the router moving, like the slot ring.
    DropNewest,
}

/// Forwards IQ blocks to a tokio mpsc channel for live processing.
///
/// Once the receiver is dropped, writes fail with
/// [`SinkError::ChannelClosed`] and the router detaches the sink.
///
/// # Example
///
/// ```
/// use extio_stream::{ChannelSink, FormatSet, IqBlock, Overflow, SampleFormat};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<IqBlock>(100);
/// let sink = ChannelSink::new(tx)
///     .overflow(Overflow::DropNewest)
///     .formats(FormatSet::single(SampleFormat::I16));
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<IqBlock>,
    overflow: Overflow,
    formats: Option<FormatSet>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Creates a waiting sink named `"channel"`.
    pub fn new(sender: mpsc::Sender<IqBlock>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a waiting sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<IqBlock>) -> Self {
        Self {
            name: name.into(),
            sender,
            overflow: Overflow::Wait,
            formats: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Sets the policy for a full channel.
    #[must_use]
    pub fn overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Restricts delivery to the given formats. Other blocks are skipped.
    #[must_use]
    pub fn formats(mut self, formats: impl Into<FormatSet>) -> Self {
        self.formats = Some(formats.into());
        self
    }

    /// Blocks dropped under [`Overflow::DropNewest`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, format: SampleFormat) -> bool {
        self.formats.map_or(true, |set| set.contains(format))
    }

    async fn write(&self, block: &IqBlock) -> Result<(), SinkError> {
        match self.overflow {
            Overflow::Wait => self
                .sender
                .send(block.clone())
                .await
                .map_err(|_| SinkError::ChannelClosed),
            Overflow::DropNewest => match self.sender.try_send(block.clone()) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::ChannelClosed),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped.is_power_of_two() {
                        tracing::warn!(
                            sink = %self.name,
                            sequence = block.sequence,
                            dropped,
                            "receiver lagging, dropping block"
                        );
                    }
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn block(sequence: u64) -> IqBlock {
        IqBlock::new(vec![1, 2, 3, 4], SampleFormat::I16, None, sequence, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_channel_sink_sends_blocks() {
        let (tx, mut rx) = mpsc::channel::<IqBlock>(10);
        let sink = ChannelSink::new(tx);

        sink.write(&block(7)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(*received.data, vec![1, 2, 3, 4]);
        assert_eq!(received.sequence, 7);
    }

    #[tokio::test]
    async fn test_closed_channel_is_permanent() {
        let (tx, rx) = mpsc::channel::<IqBlock>(10);
        let sink = ChannelSink::new(tx).overflow(Overflow::DropNewest);
        drop(rx);

        let err = sink.write(&block(0)).await.unwrap_err();

        assert!(matches!(err, SinkError::ChannelClosed));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_oldest_blocks() {
        let (tx, mut rx) = mpsc::channel::<IqBlock>(2);
        let sink = ChannelSink::with_name("lossy", tx).overflow(Overflow::DropNewest);

        for sequence in 0..5 {
            sink.write(&block(sequence)).await.unwrap();
        }

        assert_eq!(sink.dropped(), 3);
        assert_eq!(rx.recv().await.unwrap().sequence, 0);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_receiver_drains() {
        let (tx, mut rx) = mpsc::channel::<IqBlock>(1);
        let sink = ChannelSink::new(tx);
        sink.write(&block(0)).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(20), sink.write(&block(1))).await;
        assert!(pending.is_err());

        assert_eq!(rx.recv().await.unwrap().sequence, 0);
        sink.write(&block(2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_format_filter() {
        let (tx, _rx) = mpsc::channel::<IqBlock>(1);
        let sink = ChannelSink::with_name("demod", tx).formats([SampleFormat::I16, SampleFormat::F32]);

        assert_eq!(sink.name(), "demod");
        assert!(sink.accepts(SampleFormat::F32));
        assert!(!sink.accepts(SampleFormat::U8));
    }
}
