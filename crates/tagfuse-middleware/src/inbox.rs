//! [`Inbox`] – background receive, synchronous drain.
//!
//! Listeners never let the update scheduler touch a live channel.  An inbox
//! owns a worker thread that blocks on a [`TopicReceiver`], converts each
//! event with a caller-supplied extractor and appends the result to a
//! mutex-guarded buffer.  The scheduler side only ever calls
//! [`Inbox::drain`], which swaps the whole buffer out in one critical section
//! and therefore always returns a point-in-time snapshot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use tagfuse_types::{Event, FusionError};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::bus::TopicReceiver;

struct InboxState<T> {
    pending: Vec<T>,
    last_received: Option<Instant>,
    received_total: u64,
}

/// Thread-safe accumulation buffer shared between a receiver thread and the
/// scheduler.  Cloning yields another handle to the same buffer.
pub struct Inbox<T> {
    state: Arc<Mutex<InboxState<T>>>,
}

impl<T> Clone for Inbox<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Inbox<T> {
    /// Create an empty inbox with no worker attached.  Items arrive through
    /// [`Inbox::push`].
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InboxState {
                pending: Vec::new(),
                last_received: None,
                received_total: 0,
            })),
        }
    }

    /// Append `item` and refresh the arrival time.
    pub fn push(&self, item: T) {
        let mut state = self.lock();
        state.pending.push(item);
        state.last_received = Some(Instant::now());
        state.received_total += 1;
    }

    /// Take everything accumulated since the previous drain, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Wall-clock time of the most recent [`push`](Self::push).  Not reset by
    /// [`drain`](Self::drain).
    pub fn last_received(&self) -> Option<Instant> {
        self.lock().last_received
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn received_total(&self) -> u64 {
        self.lock().received_total
    }

    // A poisoned lock only means a worker panicked mid-push; the buffer is
    // still structurally valid.
    fn lock(&self) -> MutexGuard<'_, InboxState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Send + 'static> Inbox<T> {
    /// Spawn a named worker thread that feeds a new inbox from `receiver`.
    ///
    /// `extract` maps each bus event to an item, or `None` to ignore it.  The
    /// worker exits when every sender of the topic has been dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the OS refuses to spawn the
    /// thread.
    pub fn spawn<F>(name: &str, mut receiver: TopicReceiver, mut extract: F) -> Result<Self, FusionError>
    where
        F: FnMut(Event) -> Option<T> + Send + 'static,
    {
        let inbox = Self::new();
        let worker = inbox.clone();
        let label = name.to_string();
        thread::Builder::new()
            .name(format!("inbox-{name}"))
            .spawn(move || {
                loop {
                    match receiver.blocking_recv() {
                        Ok(event) => {
                            if let Some(item) = extract(event) {
                                worker.push(item);
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(inbox = %label, dropped = n, "inbox receiver lagged; events lost");
                        }
                        Err(RecvError::Closed) => {
                            debug!(inbox = %label, "bus closed; inbox worker exiting");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| FusionError::Transport(format!("failed to spawn inbox worker {name}: {e}")))?;
        Ok(inbox)
    }
}
