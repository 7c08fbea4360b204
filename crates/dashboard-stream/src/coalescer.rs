use std::time::Duration;

/// When a scheduled flush fires.
///
/// The dashboard flushes on its render cadence; outside a renderer this is a
/// fixed-rate timer or simply the next turn of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTick {
    /// Flush once this much time has passed since the flush was scheduled.
    Interval(Duration),
    /// Flush as soon as the current task yields back to the scheduler.
    NextTurn,
}

impl Default for FlushTick {
    fn default() -> Self {
        // ~60 Hz
        Self::Interval(Duration::from_millis(16))
    }
}

impl FlushTick {
    /// `0` means `NextTurn`.
    pub fn from_millis(millis: u64) -> Self {
        if millis == 0 {
            Self::NextTurn
        } else {
            Self::Interval(Duration::from_millis(millis))
        }
    }

    pub(crate) async fn wait(self) {
        match self {
            Self::Interval(period) => tokio::time::sleep(period).await,
            Self::NextTurn => tokio::task::yield_now().await,
        }
    }
}

/// Text accumulated for the current flush cycle.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    text: String,
}

impl ChunkBuffer {
    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Reads and clears the buffer in one step.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }
}

/// Result of pushing a fragment into the coalescer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushSchedule {
    /// No flush was pending; the caller must schedule exactly one.
    Schedule,
    /// A flush is already scheduled and will carry this fragment too.
    AlreadyPending,
}

/// Batches decoded fragments so consumers see at most one update per tick.
///
/// Across a whole stream the concatenation of every payload returned by
/// `flush`/`finish` equals the concatenation of every pushed fragment.
#[derive(Debug, Default)]
pub struct ChunkCoalescer {
    buffer: ChunkBuffer,
    pending: bool,
    flushes: usize,
}

impl ChunkCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a fragment and reports whether a flush needs scheduling.
    pub fn push(&mut self, fragment: &str) -> FlushSchedule {
        self.buffer.append(fragment);
        if self.pending {
            FlushSchedule::AlreadyPending
        } else {
            self.pending = true;
            FlushSchedule::Schedule
        }
    }

    /// Delivers everything buffered since the last flush and clears the
    /// pending flag. Returns `None` when there is nothing to deliver.
    pub fn flush(&mut self) -> Option<String> {
        self.pending = false;
        if self.buffer.is_empty() {
            return None;
        }
        self.flushes += 1;
        Some(self.buffer.take())
    }

    /// Whether a flush is currently scheduled.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Bytes waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of non-empty payloads delivered so far.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// End of stream: flush the remainder immediately.
    pub fn finish(mut self) -> Option<String> {
        self.flush()
    }

    /// Cancellation: drop whatever has not been flushed. Returns the number of
    /// discarded bytes.
    pub fn discard(mut self) -> usize {
        self.buffer.take().len()
    }
}
