//! Bounded, watermark flow-controlled channels between stages.
//!
//! A [`Channel`] is the only state two adjacent stages share. It offers
//! non-blocking [`try_push`](Channel::try_push) / [`try_pull`](Channel::try_pull)
//! for the cooperative driver and awaiting [`push`](Channel::push) /
//! [`pull`](Channel::pull) for stages running on their own tasks. All counters
//! live behind one lock, so the contract is the same from either side.
//!
//! Flow control uses two watermarks. Once occupancy reaches the high
//! watermark the channel pauses and rejects pushes, handing the chunk back to
//! the producer. It resumes only when a pull brings occupancy down to the low
//! watermark.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::core::{Chunk, Error, ErrorKind, Result};

/// Sizing and watermarks for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelConfig {
    /// Maximum number of chunks the channel holds
    pub capacity: usize,
    /// Occupancy at which pushes start being rejected; defaults to `capacity`
    pub high_watermark: Option<usize>,
    /// Occupancy at which pushes are accepted again; defaults to `capacity / 2`
    pub low_watermark: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            high_watermark: None,
            low_watermark: None,
        }
    }
}

impl ChannelConfig {
    /// Create a config with default watermarks for the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Set the high watermark
    pub fn high_watermark(mut self, high: usize) -> Self {
        self.high_watermark = Some(high);
        self
    }

    /// Set the low watermark
    pub fn low_watermark(mut self, low: usize) -> Self {
        self.low_watermark = Some(low);
        self
    }

    /// Resolve defaults and validate `low < high <= capacity`
    pub fn watermarks(&self) -> Result<Watermarks> {
        if self.capacity == 0 {
            return Err(Error::configuration("channel capacity must be at least 1"));
        }
        let high = self.high_watermark.unwrap_or(self.capacity);
        let low = self.low_watermark.unwrap_or(self.capacity / 2);
        if high > self.capacity {
            return Err(Error::configuration(format!(
                "high watermark {} exceeds capacity {}",
                high, self.capacity
            )));
        }
        if low >= high {
            return Err(Error::configuration(format!(
                "low watermark {} must be below high watermark {}",
                low, high
            )));
        }
        Ok(Watermarks {
            capacity: self.capacity,
            high,
            low,
        })
    }
}

/// Validated channel thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub capacity: usize,
    pub high: usize,
    pub low: usize,
}

/// The "pause" signal returned to a producer whose push was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backpressure {
    pub occupied: usize,
    pub high_watermark: usize,
}

/// Result of a non-blocking push
#[derive(Debug)]
pub enum PushOutcome {
    /// The chunk is queued and visible to the consumer
    Accepted,
    /// The channel is paused; the chunk is handed back untouched
    Rejected { chunk: Chunk, signal: Backpressure },
}

impl PushOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushOutcome::Accepted)
    }
}

/// Result of a non-blocking pull
#[derive(Debug, PartialEq, Eq)]
pub enum PullOutcome {
    Chunk(Chunk),
    /// Nothing queued yet, but the producer may still push
    Empty,
    /// Closed and fully drained
    Closed,
}

/// Point-in-time view of a channel's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub capacity: usize,
    pub occupied: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub paused: bool,
    pub closed: bool,
    pub error: Option<ErrorKind>,
}

struct State {
    queue: VecDeque<Chunk>,
    paused: bool,
    closed: bool,
    error: Option<Error>,
    last_sequence: Option<u64>,
    saw_last: bool,
}

struct Inner {
    label: String,
    marks: Watermarks,
    state: Mutex<State>,
    readable: Notify,
    writable: Notify,
    activity: Option<Arc<Notify>>,
}

/// A bounded FIFO of chunks with watermark backpressure.
///
/// Cloning a channel yields another handle to the same queue.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Create a standalone channel
    pub fn new(config: ChannelConfig) -> Result<Self> {
        Self::build(config, "channel".to_string(), None)
    }

    /// Create a channel that also wakes `activity` on every state change
    pub(crate) fn with_activity(
        config: ChannelConfig,
        label: String,
        activity: Arc<Notify>,
    ) -> Result<Self> {
        Self::build(config, label, Some(activity))
    }

    fn build(config: ChannelConfig, label: String, activity: Option<Arc<Notify>>) -> Result<Self> {
        let marks = config.watermarks()?;
        Ok(Self {
            inner: Arc::new(Inner {
                label,
                marks,
                state: Mutex::new(State {
                    queue: VecDeque::with_capacity(marks.capacity),
                    paused: false,
                    closed: false,
                    error: None,
                    last_sequence: None,
                    saw_last: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
                activity,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn watermarks(&self) -> Watermarks {
        self.inner.marks
    }

    /// Offer a chunk without waiting.
    ///
    /// Returns `Rejected` while the channel is paused. Pushing into a closed
    /// channel, or breaking sequence order, is a protocol violation; pushing
    /// into a failed channel returns the failure.
    pub fn try_push(&self, chunk: Chunk) -> Result<PushOutcome> {
        let marks = self.inner.marks;
        let paused_now;
        {
            let mut state = self.inner.state.lock();
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
            if state.closed {
                return Err(Error::protocol(format!(
                    "push into closed channel {}",
                    self.inner.label
                )));
            }
            if state.saw_last {
                return Err(Error::protocol(format!(
                    "push after final chunk on channel {}",
                    self.inner.label
                )));
            }
            if let Some(previous) = state.last_sequence {
                if chunk.sequence() <= previous {
                    return Err(Error::protocol(format!(
                        "sequence {} does not follow {} on channel {}",
                        chunk.sequence(),
                        previous,
                        self.inner.label
                    )));
                }
            }

            let occupied = state.queue.len();
            if state.paused || occupied >= marks.high {
                state.paused = true;
                #[cfg(feature = "metrics")]
                crate::metrics::record_push(false);
                return Ok(PushOutcome::Rejected {
                    chunk,
                    signal: Backpressure {
                        occupied,
                        high_watermark: marks.high,
                    },
                });
            }

            state.last_sequence = Some(chunk.sequence());
            state.saw_last = chunk.is_last();
            state.queue.push_back(chunk);
            paused_now = state.queue.len() >= marks.high;
            if paused_now {
                state.paused = true;
            }
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_push(true);
        if paused_now {
            trace!(channel = %self.inner.label, high = marks.high, "channel paused");
            #[cfg(feature = "metrics")]
            crate::metrics::record_pause();
        }
        self.inner.readable.notify_waiters();
        self.notify_activity();
        Ok(PushOutcome::Accepted)
    }

    /// Take the oldest chunk without waiting.
    pub fn try_pull(&self) -> Result<PullOutcome> {
        let marks = self.inner.marks;
        let (chunk, resumed) = {
            let mut state = self.inner.state.lock();
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
            match state.queue.pop_front() {
                Some(chunk) => {
                    let resumed = state.paused && state.queue.len() <= marks.low;
                    if resumed {
                        state.paused = false;
                    }
                    (chunk, resumed)
                }
                None if state.closed => return Ok(PullOutcome::Closed),
                None => return Ok(PullOutcome::Empty),
            }
        };

        #[cfg(feature = "metrics")]
        crate::metrics::record_pull();
        if resumed {
            trace!(channel = %self.inner.label, low = marks.low, "channel resumed");
            self.inner.writable.notify_waiters();
        }
        self.notify_activity();
        Ok(PullOutcome::Chunk(chunk))
    }

    /// Push a chunk, waiting for the channel to resume if it is paused.
    pub async fn push(&self, chunk: Chunk) -> Result<()> {
        let mut chunk = chunk;
        loop {
            let writable = self.inner.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            match self.try_push(chunk)? {
                PushOutcome::Accepted => return Ok(()),
                PushOutcome::Rejected { chunk: returned, .. } => {
                    chunk = returned;
                    writable.await;
                }
            }
        }
    }

    /// Pull the next chunk, waiting for data. Returns `None` once closed and drained.
    pub async fn pull(&self) -> Result<Option<Chunk>> {
        loop {
            let readable = self.inner.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            match self.try_pull()? {
                PullOutcome::Chunk(chunk) => return Ok(Some(chunk)),
                PullOutcome::Closed => return Ok(None),
                PullOutcome::Empty => readable.await,
            }
        }
    }

    /// Stop accepting pushes. Queued chunks remain available to pull.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        trace!(channel = %self.inner.label, "channel closed");
        self.wake_all();
    }

    /// Terminate the channel with an error, discarding queued chunks.
    ///
    /// Only the first failure sticks; returns whether this call set it.
    pub fn fail(&self, error: Error) -> bool {
        let kind = error.kind();
        {
            let mut state = self.inner.state.lock();
            if state.error.is_some() {
                return false;
            }
            state.queue.clear();
            state.paused = false;
            state.closed = true;
            state.error = Some(error);
        }
        trace!(channel = %self.inner.label, %kind, "channel failed");
        #[cfg(feature = "metrics")]
        crate::metrics::record_channel_failure(kind);
        self.wake_all();
        true
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn occupied(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// The failure this channel was terminated with, if any
    pub fn error(&self) -> Option<Error> {
        self.inner.state.lock().error.clone()
    }

    pub fn state(&self) -> ChannelState {
        let marks = self.inner.marks;
        let state = self.inner.state.lock();
        ChannelState {
            capacity: marks.capacity,
            occupied: state.queue.len(),
            high_watermark: marks.high,
            low_watermark: marks.low,
            paused: state.paused,
            closed: state.closed,
            error: state.error.as_ref().map(Error::kind),
        }
    }

    fn wake_all(&self) {
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
        self.notify_activity();
    }

    fn notify_activity(&self) {
        if let Some(activity) = &self.inner.activity {
            activity.notify_one();
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}
