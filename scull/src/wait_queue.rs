//! Wait queue for blocked openers
//!
//! FIFO of waiters, each with its own oneshot channel. Waking sends on the
//! channel of the oldest waiter whose receiver is still alive.
//!
//! # Lost wakeups
//!
//! The queue does not lock by itself. It lives inside the state it guards,
//! and the opener must make "check condition" and "enqueue" atomic under
//! that state's lock:
//!
//! ```ignore
//! let ticket = {
//!     let mut state = self.state.lock();
//!     if state.permits(caller) {
//!         return Ok(());
//!     }
//!     state.waiters.enqueue(caller.uid)
//! }; // lock released before awaiting
//! ticket.wait(cancel).await;
//! ```
//!
//! Otherwise a release that happens between the check and the enqueue
//! wakes nobody and the opener sleeps forever.
//!
//! A waiter is not granted anything by a wakeup; it re-checks the
//! condition. A waiter that stops waiting, by cancellation or by having its
//! future dropped, must call [`WaitTicket::withdraw`] and hand a wakeup it
//! received on to the next waiter. Otherwise that wakeup is lost.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Waiter {
    sender: oneshot::Sender<()>,
    uid: u32,
}

/// Why a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a release; re-check the condition
    Woken,
    /// Cancelled by the caller; withdraw the ticket
    Cancelled,
}

/// Registration of one waiter, returned by [`WaitQueue::enqueue`]
#[derive(Debug)]
pub struct WaitTicket {
    receiver: oneshot::Receiver<()>,
    done: bool,
}

impl WaitTicket {
    /// Wait for a wakeup or for `cancel`
    ///
    /// Must be awaited without holding the lock of the state the queue
    /// lives in. After `Woken` the ticket is spent.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> WaitOutcome {
        if self.done {
            return WaitOutcome::Woken;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => WaitOutcome::Cancelled,
            // A dropped sender means the queue is gone; re-checking is the
            // right reaction either way.
            _ = &mut self.receiver => {
                self.done = true;
                WaitOutcome::Woken
            }
        }
    }

    /// Stop waiting
    ///
    /// Returns true if a wakeup was delivered but not consumed by
    /// [`WaitTicket::wait`]; the caller then owes it to the next waiter.
    /// Later calls return false.
    pub fn withdraw(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        // No wakeup can be delivered after close; one delivered before it
        // is still in the channel.
        self.receiver.close();
        self.receiver.try_recv().is_ok()
    }
}

/// First-blocked-first-woken queue
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter at the back of the queue
    pub fn enqueue(&mut self, uid: u32) -> WaitTicket {
        let (sender, receiver) = oneshot::channel();
        self.waiters.push_back(Waiter { sender, uid });
        log::debug!(
            "wait_queue.enqueue: uid {uid}, waiters: {}",
            self.waiters.len()
        );
        WaitTicket {
            receiver,
            done: false,
        }
    }

    /// Wake the oldest live waiter
    ///
    /// Waiters that went away (cancelled, dropped) are discarded on the
    /// way. Returns false if nobody was woken.
    pub fn wake_one(&mut self) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.sender.send(()).is_ok() {
                log::debug!(
                    "wait_queue.wake_one: woke uid {}, left: {}",
                    waiter.uid,
                    self.waiters.len()
                );
                return true;
            }
            log::debug!(
                "wait_queue.wake_one: uid {} is gone, skipping",
                waiter.uid
            );
        }
        false
    }

    /// Waiters registered and not yet woken, including ones that already
    /// went away
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
