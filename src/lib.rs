//! An unbounded lock-free MPSC channel with blocking receive semantics.
//!
//! Any number of producers append messages without blocking or locking;
//! exactly one consumer removes them in FIFO order, optionally blocking
//! until data arrives or every producer disconnects.
//!
//! # Design
//!
//! The channel is an intrusive linked list with a permanent dummy node:
//!
//! ```text
//!   tail ──► Node ◄── Node ◄── ... ◄── Node ◄── head (consumer-owned)
//!          (newest)                  (dummy)
//! ```
//!
//! - Producers publish with exactly one contended atomic: a swap of `tail`
//!   to the new node, followed by an uncontended release store linking the
//!   previous tail to it.
//! - The consumer owns `head` outright. Popping is an acquire load of
//!   `head->next`, a move of the value, and a plain pointer advance. No
//!   CAS, no shared counters.
//! - Nodes are freed only by the consumer, only after it has advanced past
//!   them. No other thread can still hold a reference to a freed node, so
//!   the structure needs no epoch/hazard machinery and has no ABA hazard.
//!
//! # Three-Phase Receive
//!
//! Syscalls are expensive (~1000+ cycles), so [`Receiver::recv`] tries
//! cheaper options before committing to one:
//!
//! ```text
//! Phase 1: Fast path
//! ├── Pop immediately
//! └── Succeeds when data is already available
//!
//! Phase 2: Backoff (spin + yield)
//! ├── crossbeam's Backoff::snooze()
//! ├── Configurable iterations (default: 8)
//! └── Catches data arriving "soon"
//!
//! Phase 3: Park (syscall)
//! ├── Sleep via the OS parking primitive
//! └── Only when data is truly not coming
//! ```
//!
//! Producers only pay for the wakeup when it is needed: after publishing,
//! a sender checks the `receiver_parked` flag (an atomic load) and issues
//! the unpark syscall only if the consumer has actually gone to sleep.
//!
//! # Memory Ordering
//!
//! The parking flag uses `SeqCst` to close the sleep/publish race:
//!
//! ```text
//! Receiver:                        Sender:
//! ─────────────────────            ─────────────────────
//! store(receiver_parked, true)
//! [SeqCst barrier]                 publish(message)
//! pop() -> empty                   [SeqCst barrier]
//! park()                           load(receiver_parked) -> true
//!                                  unpark()
//! ```
//!
//! The `SeqCst` total order, together with re-checking the queue *after*
//! setting the flag, guarantees that either the sender observes the flag
//! and unparks, or the receiver's recheck observes the message and never
//! parks. The parker's token makes an early unpark stick: a `park()` call
//! that races with `unpark()` returns immediately instead of sleeping.
//!
//! # Example
//!
//! ```
//! use relay_channel::channel;
//!
//! let (tx, mut rx) = channel::<u64>();
//!
//! // Sends never block - the channel is unbounded
//! tx.send(42).unwrap();
//!
//! // Blocking recv - waits until a message arrives
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```
//!
//! # Multiple Producers
//!
//! ```
//! use relay_channel::channel;
//! use std::thread;
//!
//! let (tx, mut rx) = channel::<u64>();
//!
//! let handles: Vec<_> = (0..3)
//!     .map(|p| {
//!         let tx = tx.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 tx.send(p * 1000 + i).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//!
//! drop(tx); // Receiver sees disconnect once the clones finish
//!
//! let mut received = Vec::new();
//! while let Ok(value) = rx.recv() {
//!     received.push(value);
//! }
//! assert_eq!(received.len(), 300);
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! ```
//!
//! # Disconnection
//!
//! ```
//! use relay_channel::{channel, TryRecvError};
//!
//! let (tx, mut rx) = channel::<u64>();
//!
//! tx.send(1).unwrap();
//! tx.send(2).unwrap();
//! drop(tx); // Disconnect
//!
//! // Buffered messages remain retrievable
//! assert_eq!(rx.recv().unwrap(), 1);
//! assert_eq!(rx.recv().unwrap(), 2);
//!
//! // Then the disconnect becomes observable
//! assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
//! ```
//!
//! # Batching
//!
//! [`Sender::send_batch`] links a whole batch privately and publishes it
//! with a single tail swap, amortizing the contended atomic across the
//! batch:
//!
//! ```
//! use relay_channel::channel;
//!
//! let (tx, mut rx) = channel::<u64>();
//!
//! assert_eq!(tx.send_batch([1, 2, 3]).unwrap(), 3);
//!
//! let mut buf = Vec::new();
//! rx.drain(&mut buf);
//! assert_eq!(buf, [1, 2, 3]);
//! ```
//!
//! # Message Types
//!
//! The factory requires `T: Send`. Crossing a thread boundary is an opt-in
//! capability in Rust (a type is only `Send` if every field is), so types
//! whose bookkeeping is not thread-safe (`Rc<T>`, `*mut T`, ...) are
//! rejected at compile time, not at runtime.
//!
//! # When to Use This
//!
//! Use `relay_channel` when:
//! - You have many senders and exactly one receiver
//! - Sends must never block or fail transiently (no capacity limit)
//! - The receiver needs blocking semantics with low wake latency
//!
//! Consider alternatives when:
//! - You need backpressure → use a bounded queue
//! - Multiple receivers → use `crossbeam-channel` or `flume`
//! - You need `select!` macro support → use `crossbeam-channel`
//! - You need async/await → use `tokio::sync::mpsc`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod list;

pub use error::{RecvError, SendError, TryRecvError, TrySendError};

use std::fmt;
use std::ptr::NonNull;

use crossbeam_utils::Backoff;
use crossbeam_utils::sync::Parker;

use list::Channel;

/// Default number of backoff snooze iterations before parking.
///
/// Each snooze uses `crossbeam_utils::Backoff::snooze()` which starts with
/// spinning and eventually yields to the OS scheduler.
const DEFAULT_SNOOZE_ITERS: usize = 8;

/// Node allocation book-keeping, enabled with the `alloc-audit` feature.
///
/// Every list node allocation and free bumps a process-global counter, so
/// leak tests can assert the two match once all handles are dropped.
#[cfg(feature = "alloc-audit")]
pub mod audit {
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) static NODE_ALLOCS: AtomicUsize = AtomicUsize::new(0);
    pub(crate) static NODE_FREES: AtomicUsize = AtomicUsize::new(0);

    /// Total list nodes allocated since process start (all channels).
    pub fn node_allocs() -> usize {
        NODE_ALLOCS.load(Ordering::SeqCst)
    }

    /// Total list nodes freed since process start (all channels).
    pub fn node_frees() -> usize {
        NODE_FREES.load(Ordering::SeqCst)
    }
}

/// Creates an unbounded MPSC channel.
///
/// Returns a `(Sender, Receiver)` pair. The sender can be cloned freely;
/// the receiver cannot.
///
/// Uses default backoff settings (8 snooze iterations before parking).
/// For custom backoff tuning, use [`channel_with_config`].
///
/// # Example
///
/// ```
/// use relay_channel::channel;
///
/// let (tx, mut rx) = channel::<String>();
///
/// tx.send("hello".to_string()).unwrap();
/// assert_eq!(rx.recv().unwrap(), "hello");
/// ```
pub fn channel<T: Send>() -> (Sender<T>, Receiver<T>) {
    channel_with_config(DEFAULT_SNOOZE_ITERS)
}

/// Creates an unbounded MPSC channel with custom backoff configuration.
///
/// # Arguments
///
/// * `snooze_iters` - Number of backoff iterations [`Receiver::recv`] runs
///   before parking. Higher values burn more CPU but reduce latency for
///   bursty workloads.
///
/// # Example
///
/// ```
/// use relay_channel::channel_with_config;
///
/// // More aggressive spinning for lower latency
/// let (tx, mut rx) = channel_with_config::<u64>(32);
/// # tx.send(1).unwrap();
/// # assert_eq!(rx.recv().unwrap(), 1);
/// ```
pub fn channel_with_config<T: Send>(snooze_iters: usize) -> (Sender<T>, Receiver<T>) {
    let parker = Parker::new();
    let inner = Channel::allocate(parker.unparker().clone());
    let head = unsafe { inner.as_ref().initial_head() };

    (
        Sender { inner },
        Receiver {
            inner,
            head,
            parker,
            snooze_iters,
        },
    )
}

/// The sending half of a channel.
///
/// This struct can be cloned to create multiple producers. All clones share
/// the same underlying queue. Sends never block (the channel is unbounded)
/// and only fail once the receiver has been dropped.
///
/// # Example
///
/// ```
/// use relay_channel::channel;
///
/// let (tx, mut rx) = channel::<i32>();
/// let tx2 = tx.clone();
///
/// tx.send(1).unwrap();
/// tx2.send(2).unwrap();
///
/// assert_eq!(rx.recv().unwrap(), 1);
/// assert_eq!(rx.recv().unwrap(), 2);
/// ```
pub struct Sender<T> {
    inner: NonNull<Channel<T>>,
}

// Safety: Sender can be sent to another thread. The list uses proper atomic
// synchronization for multi-producer access.
unsafe impl<T: Send> Send for Sender<T> {}

// Safety: Sender can be shared across threads (for cloning and sending by
// reference); every producer-side operation takes `&self` and is atomic.
unsafe impl<T: Send> Sync for Sender<T> {}

impl<T> Sender<T> {
    /// Sends a message into the channel. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Err(SendError(value))` if the receiver has been dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, rx) = channel::<i32>();
    ///
    /// tx.send(1).unwrap();
    ///
    /// drop(rx);
    /// assert!(tx.send(2).is_err());
    /// ```
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let inner = unsafe { self.inner.as_ref() };

        if inner.is_receiver_disconnected() {
            return Err(SendError(value));
        }

        inner.push(value);
        Ok(())
    }

    /// Attempts to send a message. Never blocks.
    ///
    /// Identical to [`send`](Sender::send) apart from the error type; the
    /// channel is unbounded, so there is no transient failure to retry.
    ///
    /// # Errors
    ///
    /// Returns `Err(TrySendError::Disconnected(value))` if the receiver has
    /// been dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::{channel, TrySendError};
    ///
    /// let (tx, rx) = channel::<i32>();
    ///
    /// assert!(tx.try_send(1).is_ok());
    ///
    /// drop(rx);
    /// assert!(matches!(tx.try_send(2), Err(TrySendError::Disconnected(2))));
    /// ```
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let inner = unsafe { self.inner.as_ref() };

        if inner.is_receiver_disconnected() {
            return Err(TrySendError::Disconnected(value));
        }

        inner.push(value);
        Ok(())
    }

    /// Sends every message from `values` as one atomically-published batch.
    ///
    /// The batch is linked into a private chain first, then published with
    /// a single tail swap and a single wakeup, amortizing the contended
    /// atomic across the batch. The consumer observes the messages in
    /// iteration order, exactly as if they had been sent individually.
    ///
    /// An empty batch is a no-op and returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns `Err(SendError(values))` with the collected unsent batch if
    /// the receiver has been dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, mut rx) = channel::<u64>();
    ///
    /// assert_eq!(tx.send_batch(vec![1, 2, 3]).unwrap(), 3);
    /// assert_eq!(rx.recv().unwrap(), 1);
    /// ```
    pub fn send_batch<I>(&self, values: I) -> Result<usize, SendError<Vec<T>>>
    where
        I: IntoIterator<Item = T>,
    {
        let inner = unsafe { self.inner.as_ref() };
        let values = values.into_iter();

        if inner.is_receiver_disconnected() {
            return Err(SendError(values.collect()));
        }

        Ok(inner.push_batch(values))
    }

    /// Returns `true` if the receiver has been dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, rx) = channel::<i32>();
    /// assert!(!tx.is_disconnected());
    ///
    /// drop(rx);
    /// assert!(tx.is_disconnected());
    /// ```
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref() }.is_receiver_disconnected()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        let inner = unsafe { self.inner.as_ref() };
        inner.add_sender();
        Channel::acquire(self.inner);

        Self { inner: self.inner }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        unsafe {
            let inner = self.inner.as_ref();
            if inner.remove_sender() == 1 {
                // Last sender gone: wake the consumer unconditionally so it
                // observes the disconnect instead of parking forever.
                inner.wake_receiver();
            }
            Channel::release(self.inner);
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// The receiving half of a channel.
///
/// This struct cannot be cloned - there is only one consumer. It can be
/// moved to another thread.
///
/// # Example
///
/// ```
/// use relay_channel::channel;
/// use std::thread;
///
/// let (tx, mut rx) = channel::<i32>();
///
/// thread::spawn(move || {
///     tx.send(42).unwrap();
/// });
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct Receiver<T> {
    inner: NonNull<Channel<T>>,

    /// Our position in the list. We're the only reader, so no atomic
    /// needed; the header copy is only synced in Drop for teardown.
    head: *mut list::Node<T>,

    /// Parked on in phase 3 of `recv`.
    parker: Parker,

    /// Backoff iterations before parking.
    snooze_iters: usize,
}

// Safety: Receiver can be sent to another thread, but not shared (not Sync).
unsafe impl<T: Send> Send for Receiver<T> {}

impl<T> Receiver<T> {
    /// Receives a message from the channel, blocking if necessary.
    ///
    /// If the channel is empty, this method will:
    /// 1. Check immediately (fast path)
    /// 2. Use exponential backoff with yields
    /// 3. Park the thread until a message arrives
    ///
    /// # Errors
    ///
    /// Returns `Err(RecvError)` once every sender has been dropped and no
    /// messages remain in the channel.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    /// use std::thread;
    ///
    /// let (tx, mut rx) = channel::<i32>();
    ///
    /// thread::spawn(move || {
    ///     tx.send(42).unwrap();
    /// });
    ///
    /// assert_eq!(rx.recv().unwrap(), 42);
    /// ```
    pub fn recv(&mut self) -> Result<T, RecvError> {
        let inner = unsafe { self.inner.as_ref() };

        // Fast path
        if let Some(value) = unsafe { inner.pop(&mut self.head) } {
            return Ok(value);
        }

        // Backoff phase
        let backoff = Backoff::new();
        for _ in 0..self.snooze_iters {
            backoff.snooze();

            if let Some(value) = unsafe { inner.pop(&mut self.head) } {
                return Ok(value);
            }

            if inner.sender_count() == 0 {
                return self.final_pop().ok_or(RecvError);
            }
        }

        // Park phase
        loop {
            inner.set_parked();

            // Check after signaling - prevents missed wakeup race
            if let Some(value) = unsafe { inner.pop(&mut self.head) } {
                inner.clear_parked();
                return Ok(value);
            }

            if inner.sender_count() == 0 {
                inner.clear_parked();
                return self.final_pop().ok_or(RecvError);
            }

            self.parker.park();
            inner.clear_parked();

            // Try again after wake
            if let Some(value) = unsafe { inner.pop(&mut self.head) } {
                return Ok(value);
            }

            if inner.sender_count() == 0 {
                return self.final_pop().ok_or(RecvError);
            }
        }
    }

    /// Attempts to receive a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(TryRecvError::Empty)` if no message is currently
    /// available, and `Err(TryRecvError::Disconnected)` if every sender has
    /// been dropped AND the queue is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::{channel, TryRecvError};
    ///
    /// let (tx, mut rx) = channel::<i32>();
    ///
    /// assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    ///
    /// tx.send(1).unwrap();
    /// assert_eq!(rx.try_recv().unwrap(), 1);
    ///
    /// drop(tx);
    /// assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    /// ```
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let inner = unsafe { self.inner.as_ref() };

        if let Some(value) = unsafe { inner.pop(&mut self.head) } {
            return Ok(value);
        }

        if inner.sender_count() == 0 {
            self.final_pop().ok_or(TryRecvError::Disconnected)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Receives a message, blocking if necessary, returning `None` once
    /// every sender has disconnected and the queue is drained.
    ///
    /// Convenient in `while let` receive loops:
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, mut rx) = channel::<u64>();
    /// tx.send(1).unwrap();
    /// drop(tx);
    ///
    /// while let Some(value) = rx.recv_opt() {
    ///     assert_eq!(value, 1);
    /// }
    /// ```
    #[inline]
    pub fn recv_opt(&mut self) -> Option<T> {
        self.recv().ok()
    }

    /// Receives up to `max` already-available messages into `buf`.
    ///
    /// Never blocks; stops early when the queue is empty. Returns the
    /// number of messages appended to `buf`.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, mut rx) = channel::<u64>();
    /// tx.send_batch([1, 2, 3, 4]).unwrap();
    ///
    /// let mut buf = Vec::new();
    /// assert_eq!(rx.recv_batch(&mut buf, 3), 3);
    /// assert_eq!(buf, [1, 2, 3]);
    /// ```
    pub fn recv_batch(&mut self, buf: &mut Vec<T>, max: usize) -> usize {
        let inner = unsafe { self.inner.as_ref() };

        let mut count = 0;
        while count < max {
            match unsafe { inner.pop(&mut self.head) } {
                Some(value) => {
                    buf.push(value);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Receives every already-available message into `buf`.
    ///
    /// Never blocks. Returns the number of messages appended to `buf`.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, mut rx) = channel::<u64>();
    /// tx.send_batch([1, 2, 3]).unwrap();
    ///
    /// let mut buf = Vec::new();
    /// assert_eq!(rx.drain(&mut buf), 3);
    /// assert!(rx.is_empty());
    /// ```
    #[inline]
    pub fn drain(&mut self, buf: &mut Vec<T>) -> usize {
        self.recv_batch(buf, usize::MAX)
    }

    /// Returns `true` if no message is currently visible to the consumer.
    ///
    /// A message mid-publication (tail swapped, link not yet stored) counts
    /// as not visible.
    #[inline]
    pub fn is_empty(&self) -> bool {
        unsafe { self.inner.as_ref().is_empty(self.head) }
    }

    /// Returns `true` if all senders have been dropped.
    ///
    /// Note: Even if disconnected, there may still be messages in the queue
    /// that can be received.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_channel::channel;
    ///
    /// let (tx, rx) = channel::<i32>();
    /// assert!(!rx.is_disconnected());
    ///
    /// drop(tx);
    /// assert!(rx.is_disconnected());
    /// ```
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref() }.sender_count() == 0
    }

    /// Returns the number of messages currently visible to the consumer.
    ///
    /// Diagnostic only: the count is computed by walking the list and can
    /// be stale the instant it returns if producers are active. Never use
    /// it for exact-equality assertions under concurrency.
    pub fn approximate_len(&self) -> usize {
        unsafe { self.inner.as_ref().len_walk(self.head) }
    }

    /// One more pop after the sender count hit zero.
    ///
    /// The count reaching zero happens-after every producer's final link
    /// store, so a single recheck decides between drained and disconnected.
    #[inline]
    fn final_pop(&mut self) -> Option<T> {
        let inner = unsafe { self.inner.as_ref() };
        unsafe { inner.pop(&mut self.head) }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        unsafe {
            let inner = self.inner.as_ref();
            // Sync our position so teardown drains from the right node.
            inner.store_head(self.head);
            inner.set_receiver_disconnected();
            Channel::release(self.inner);
        }
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("disconnected", &self.is_disconnected())
            .field("is_empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}
