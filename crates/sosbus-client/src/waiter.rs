use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sosbus_frame::Message;
use tracing::trace;

use crate::error::{ClientError, PreconditionViolation, Result};
use crate::pattern::Pattern;

const NOT_CONNECTED: &str = "not connected";

/// Single-slot rendezvous between the receiver thread and one blocked caller.
///
/// At most one wait is active at a time. The receiver thread offers every
/// dispatched message; the active slot keeps those matching its pattern, up
/// to the number of replies wanted.
pub struct SyncWaiter {
    state: Mutex<WaiterState>,
    signal: Condvar,
}

struct WaiterState {
    slot: Option<Slot>,
    generation: u64,
    closed: Option<String>,
}

struct Slot {
    pattern: Pattern,
    wanted: usize,
    replies: Vec<Message>,
}

impl SyncWaiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaiterState {
                slot: None,
                generation: 0,
                closed: Some(NOT_CONNECTED.to_owned()),
            }),
            signal: Condvar::new(),
        }
    }

    /// Mark a new connection as open. Returns the generation to pass to
    /// [`SyncWaiter::close`] when that connection ends.
    pub fn open(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.closed = None;
        state.generation
    }

    /// Mark the connection of `generation` as closed and wake the waiter.
    ///
    /// Ignored if a newer connection has been opened since.
    pub fn close(&self, generation: u64, reason: impl Into<String>) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.closed = Some(reason.into());
        self.signal.notify_all();
    }

    /// Install `pattern` as the active slot, collecting up to `wanted` replies.
    ///
    /// Fails with [`PreconditionViolation::WaiterBusy`] while another slot is
    /// active and with [`ClientError::Disconnected`] when no connection is open.
    /// The slot is released when the returned guard is dropped.
    pub fn begin(&self, pattern: Pattern, wanted: usize) -> Result<WaitGuard<'_>> {
        let mut state = self.lock();
        if state.slot.is_some() {
            return Err(PreconditionViolation::WaiterBusy.into());
        }
        if let Some(reason) = &state.closed {
            return Err(ClientError::disconnected(reason.clone()));
        }
        state.slot = Some(Slot {
            pattern,
            wanted,
            replies: Vec::with_capacity(wanted.min(16)),
        });
        trace!(pattern = %pattern, wanted, "sync wait installed");
        Ok(WaitGuard { waiter: self })
    }

    /// Hand a received message to the active slot. Returns true if it was kept.
    pub fn offer(&self, message: &Message) -> bool {
        let mut state = self.lock();
        let Some(slot) = state.slot.as_mut() else {
            return false;
        };
        if slot.replies.len() >= slot.wanted || !slot.pattern.matches(message) {
            return false;
        }
        slot.replies.push(message.clone());
        self.signal.notify_all();
        true
    }

    pub fn is_busy(&self) -> bool {
        self.lock().slot.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, WaiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SyncWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SyncWaiter")
            .field("busy", &state.slot.is_some())
            .field("generation", &state.generation)
            .field("closed", &state.closed)
            .finish()
    }
}

/// The active slot of a [`SyncWaiter`]. Dropping it frees the slot.
pub struct WaitGuard<'a> {
    waiter: &'a SyncWaiter,
}

impl WaitGuard<'_> {
    /// Block until every wanted reply has arrived, the timeout elapses, or
    /// the connection closes.
    ///
    /// The timeout is one budget for the whole wait; `None` waits without
    /// limit. On timeout the replies collected so far are returned, possibly
    /// none. On close they are returned if there are any, otherwise
    /// [`ClientError::Disconnected`].
    pub fn wait(self, timeout: Option<Duration>) -> Result<Vec<Message>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.waiter.lock();

        loop {
            let Some(slot) = state.slot.as_mut() else {
                return Ok(Vec::new());
            };
            if slot.replies.len() >= slot.wanted {
                return Ok(std::mem::take(&mut slot.replies));
            }
            if let Some(reason) = &state.closed {
                let reason = reason.clone();
                return match state.slot.as_mut() {
                    Some(slot) if !slot.replies.is_empty() => Ok(std::mem::take(&mut slot.replies)),
                    _ => Err(ClientError::disconnected(reason)),
                };
            }

            state = match deadline {
                None => self
                    .waiter
                    .signal
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let replies = state
                            .slot
                            .as_mut()
                            .map(|slot| std::mem::take(&mut slot.replies))
                            .unwrap_or_default();
                        trace!(collected = replies.len(), "sync wait timed out");
                        return Ok(replies);
                    }
                    self.waiter
                        .signal
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.waiter.lock().slot = None;
    }
}
