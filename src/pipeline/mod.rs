//! IQ pipeline components.
//!
//! The pipeline connects the driver callback to sinks via a slot ring:
//!
//! ```text
//! Driver Thread → CallbackDispatcher → Slot Ring → Capture Bridge → Router Task → Sinks
//! ```
//!
//! - **CallbackDispatcher**: Demultiplexes data and control callbacks, copies bursts
//! - **Slot Ring**: Lock-free SPSC ring of fixed-size burst slots
//! - **Capture Bridge**: Polls the ring and forwards blocks to the router
//! - **Router**: Fans out blocks to sinks, retrying transient errors and detaching failed sinks
//!
//! The slot ring ensures the driver callback never blocks; when it is full
//! the newest burst is dropped and counted.

mod capture;
mod dispatcher;
mod metrics;
mod ring_buffer;
mod router;

pub(crate) use capture::CaptureBridge;
pub use dispatcher::{CallbackDispatcher, Dispatch, DispatcherState, RateQuery};
pub use metrics::MetricsSnapshot;
pub use ring_buffer::{SlotConsumer, SlotRef, StreamState};
pub(crate) use router::{Router, RouterCommand};
