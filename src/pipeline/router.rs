//! Router task that fans out IQ blocks to sinks.
//!
//! Every attached sink sees each block concurrently. How a failed write is
//! handled depends on the error class: [`SinkError::is_transient`] errors are
//! retried with exponential backoff, anything else detaches the sink for the
//! rest of the session. A write that takes longer than the block's air time
//! is reported as [`StreamEvent::SinkBackpressure`]. Sustained backpressure
//! ends in slot ring overruns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::sink::Sink;
use crate::{CaptureConfig, CaptureError, EventCallback, IqBlock, SinkError, StreamEvent};

/// Command sent to the router task.
pub enum RouterCommand {
    /// Drain pending blocks, stop the sinks, and exit.
    Stop,
}

/// Outcome of routing one block to one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Written,
    /// The sink declined the block's sample format.
    Skipped,
    /// Transient failures used up every attempt.
    GaveUp,
    Detached,
}

struct Route {
    sink: Arc<dyn Sink>,
    detached: AtomicBool,
    slow_writes: AtomicU64,
}

impl Route {
    fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            detached: AtomicBool::new(false),
            slow_writes: AtomicU64::new(0),
        }
    }

    fn name(&self) -> &str {
        self.sink.name()
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

/// Receives IQ blocks from the capture bridge and delivers them to sinks.
pub struct Router {
    routes: Vec<Route>,
    event_callback: Option<EventCallback>,
    config: CaptureConfig,
}

impl Router {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, config: CaptureConfig) -> Self {
        Self {
            routes: sinks.into_iter().map(Route::new).collect(),
            event_callback: None,
            config,
        }
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    fn emit_event(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Number of sinks still receiving blocks.
    pub fn attached(&self) -> usize {
        self.routes.iter().filter(|r| !r.is_detached()).count()
    }

    fn detach(&self, route: &Route, error: &SinkError) {
        if route.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(sink = route.name(), %error, "detaching sink after permanent error");
        self.emit_event(StreamEvent::SinkDetached {
            sink_name: route.name().to_string(),
            error: error.to_string(),
        });
    }

    fn note_write_time(&self, route: &Route, block: &IqBlock, elapsed: Duration) {
        let budget = block.duration();
        if budget.is_zero() || elapsed <= budget {
            return;
        }
        let slow = route.slow_writes.fetch_add(1, Ordering::Relaxed) + 1;
        if slow.is_power_of_two() {
            tracing::warn!(
                sink = route.name(),
                sequence = block.sequence,
                ?elapsed,
                ?budget,
                slow,
                "sink slower than real time"
            );
        }
        self.emit_event(StreamEvent::SinkBackpressure {
            sink_name: route.name().to_string(),
            elapsed,
            budget,
        });
    }

    async fn deliver(&self, route: &Route, block: &IqBlock) -> Delivery {
        if route.is_detached() {
            return Delivery::Detached;
        }
        if !route.sink.accepts(block.format) {
            tracing::trace!(sink = route.name(), format = ?block.format, "sink skips format");
            return Delivery::Skipped;
        }

        let started = Instant::now();
        let attempts = self.config.sink_retry_attempts.max(1);
        let mut delay = self.config.sink_retry_delay;
        let mut attempt = 1;

        let delivery = loop {
            let error = match route.sink.write(block).await {
                Ok(()) => break Delivery::Written,
                Err(e) => e,
            };
            self.emit_event(StreamEvent::SinkError {
                sink_name: route.name().to_string(),
                error: error.to_string(),
            });

            if !error.is_transient() {
                self.detach(route, &error);
                break Delivery::Detached;
            }
            if attempt >= attempts {
                tracing::warn!(
                    sink = route.name(),
                    sequence = block.sequence,
                    %error,
                    "dropping block for sink after {attempt} attempts"
                );
                break Delivery::GaveUp;
            }

            tracing::debug!(sink = route.name(), attempt, ?delay, "retrying sink write");
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            attempt += 1;
        };

        self.note_write_time(route, block, started.elapsed());
        delivery
    }

    /// Delivers a block to every attached sink concurrently.
    ///
    /// Outcomes are in sink registration order.
    pub(crate) async fn write_block(&self, block: &IqBlock) -> Vec<Delivery> {
        let writes: Vec<_> = self
            .routes
            .iter()
            .map(|route| self.deliver(route, block))
            .collect();

        futures::future::join_all(writes).await
    }

    /// Starts all sinks.
    ///
    /// Returns an error naming the first sink that fails to start.
    pub async fn start_sinks(&self) -> Result<(), CaptureError> {
        for route in &self.routes {
            route
                .sink
                .on_start()
                .await
                .map_err(|e| CaptureError::SinkStartFailed {
                    sink_name: route.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Stops all sinks, detached ones included, so files are finalized.
    pub async fn stop_sinks(&self) {
        for route in &self.routes {
            if let Err(e) = route.sink.on_stop().await {
                self.emit_event(StreamEvent::SinkError {
                    sink_name: route.name().to_string(),
                    error: format!("Error during shutdown: {e}"),
                });
            }
        }
    }

    /// Runs the router until [`RouterCommand::Stop`] or both channels close.
    ///
    /// Blocks keep being drained after every sink is detached so the capture
    /// bridge never stalls on a full channel.
    pub async fn run(
        self,
        mut block_rx: mpsc::Receiver<IqBlock>,
        mut cmd_rx: mpsc::Receiver<RouterCommand>,
    ) {
        let mut orphaned = false;

        loop {
            tokio::select! {
                Some(block) = block_rx.recv() => {
                    self.write_block(&block).await;
                    if !orphaned && !self.routes.is_empty() && self.attached() == 0 {
                        orphaned = true;
                        tracing::warn!("every sink is detached, discarding further blocks");
                    }
                }
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        RouterCommand::Stop => {
                            while let Ok(block) = block_rx.try_recv() {
                                self.write_block(&block).await;
                            }
                            break;
                        }
                    }
                }
                else => break,
            }
        }

        self.stop_sinks().await;
    }
}
