//! The underlying lock-free linked list for the MPSC channel.
//!
//! This is a Vyukov-style intrusive queue: an unbounded singly-linked list
//! with a permanent dummy node, an atomic `tail` shared by all producers,
//! and a `head` owned exclusively by the single consumer.
//!
//! Publication protocol:
//! - A producer swaps `tail` to its new node (acquire-release). The swap is
//!   the only point where producers order themselves against each other.
//! - The producer then release-stores the new node into the previous tail's
//!   `next`. The consumer's acquire load of `next` is what makes the node
//!   (and the message inside it) visible.
//!
//! Between the swap and the `next` store a message is *in flight*: reachable
//! from `tail` but not yet from `head`. The consumer treats the queue as
//! empty until the link lands.
//!
//! The consumer never needs atomics on `head` itself. Nodes are freed only
//! by the consumer, only after it has advanced past them, which is also why
//! the structure has no ABA hazard: a node's address cannot be recycled
//! while any producer can still touch it.

use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use crossbeam_utils::sync::Unparker;

/// A single list cell owning one message.
///
/// `next` is written exactly once, by whichever producer links the successor
/// (release), and read by the consumer (acquire). `value` is uninitialized
/// in exactly one node at a time: the dummy at the head of the list.
pub(crate) struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: MaybeUninit<T>,
}

impl<T> Node<T> {
    /// Heap-allocates a node holding `value`, with a null `next`.
    fn boxed(value: T) -> *mut Self {
        #[cfg(feature = "alloc-audit")]
        crate::audit::NODE_ALLOCS.fetch_add(1, Ordering::Relaxed);

        Box::into_raw(Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value: MaybeUninit::new(value),
        }))
    }

    /// Heap-allocates the dummy node: null `next`, no value.
    fn dummy() -> *mut Self {
        #[cfg(feature = "alloc-audit")]
        crate::audit::NODE_ALLOCS.fetch_add(1, Ordering::Relaxed);

        Box::into_raw(Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value: MaybeUninit::uninit(),
        }))
    }

    /// Frees a node without touching its value slot.
    ///
    /// # Safety
    ///
    /// `node` must have come from [`Node::boxed`] or [`Node::dummy`], must
    /// not be reachable by any other thread, and its value must already be
    /// moved out (or never initialized).
    unsafe fn free(node: *mut Self) {
        #[cfg(feature = "alloc-audit")]
        crate::audit::NODE_FREES.fetch_add(1, Ordering::Relaxed);

        // MaybeUninit has no drop glue, so this cannot double-drop the value.
        drop(unsafe { Box::from_raw(node) });
    }
}

/// The shared state of an MPSC channel.
///
/// Memory layout:
/// ```text
/// ┌───────────────────────────────────────────────────────┐
/// │ Channel header                                        │
/// │   ref_count, sender_count, receiver_disconnected      │
/// │   head (consumer position, synced only at teardown)   │
/// │   unparker (wake handle for the consumer)             │
/// ├───────────────────────────────────────────────────────┤
/// │ tail (cache-line padded) - producer swap target       │
/// ├───────────────────────────────────────────────────────┤
/// │ receiver_parked (cache-line padded) - wake flag       │
/// └───────────────────────────────────────────────────────┘
///        tail ──► Node ◄── ... ◄── Node ◄── head
///                (newest)         (dummy / consumed)
/// ```
///
/// The list segment between `head` (exclusive) and `tail` (inclusive) is
/// exactly the set of unconsumed messages, in FIFO order. `tail` is never
/// null; `head` always points at the dummy or a previously-consumed node.
pub(crate) struct Channel<T> {
    // === Reference counting ===
    ref_count: AtomicUsize,

    // === Liveness tracking ===
    /// Number of senders alive. When 0, all producers disconnected.
    sender_count: AtomicUsize,
    /// Set when the receiver is dropped.
    receiver_disconnected: AtomicBool,

    // === Consumer position ===
    /// The consumer's head pointer. The live position is kept in the
    /// `Receiver` handle; this copy is synced when the receiver drops so
    /// teardown can drain the list.
    head: AtomicPtr<Node<T>>,

    // === Wake machinery ===
    /// Wakes the consumer out of its phase-3 park.
    unparker: Unparker,

    // === Cache-line padded hot fields ===
    /// Producer swap target. Padded so contending producers don't drag the
    /// header's read-mostly fields into their cache-line ping-pong.
    tail: CachePadded<AtomicPtr<Node<T>>>,
    /// True while the consumer is committed to parking.
    receiver_parked: CachePadded<AtomicBool>,
}

unsafe impl<T: Send> Send for Channel<T> {}
unsafe impl<T: Send> Sync for Channel<T> {}

impl<T> Channel<T> {
    /// Allocates a channel with its permanent dummy node.
    ///
    /// Initial ref_count is 2 (one sender + one receiver); initial sender
    /// count is 1.
    pub(crate) fn allocate(unparker: Unparker) -> NonNull<Self> {
        let dummy = Node::dummy();

        let channel = Box::new(Self {
            ref_count: AtomicUsize::new(2),
            sender_count: AtomicUsize::new(1),
            receiver_disconnected: AtomicBool::new(false),
            head: AtomicPtr::new(dummy),
            unparker,
            tail: CachePadded::new(AtomicPtr::new(dummy)),
            receiver_parked: CachePadded::new(AtomicBool::new(false)),
        });

        // Safety: Box::into_raw never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(channel)) }
    }

    // === Producer operations ===

    /// Enqueues one message. Safe for concurrent producers. Never blocks.
    pub(crate) fn push(&self, value: T) {
        let node = Node::boxed(value);
        self.publish(node, node);
    }

    /// Enqueues every message from `values` as one atomically-published
    /// chain. Returns the number of messages enqueued.
    ///
    /// The chain is linked privately with relaxed stores (nothing is
    /// visible to the consumer yet), then published with a single tail
    /// swap and a single release store, so N messages cost one contended
    /// atomic instead of N.
    pub(crate) fn push_batch<I>(&self, values: I) -> usize
    where
        I: Iterator<Item = T>,
    {
        let mut values = values;
        let Some(first) = values.next() else {
            // Empty batch: the queue is left untouched.
            return 0;
        };

        let chain_head = Node::boxed(first);
        let mut chain_tail = chain_head;
        let mut count = 1;

        for value in values {
            let node = Node::boxed(value);
            // Safety: chain_tail is a node we allocated above and have not
            // published; no other thread can see it yet.
            unsafe { (*chain_tail).next.store(node, Ordering::Relaxed) };
            chain_tail = node;
            count += 1;
        }

        self.publish(chain_head, chain_tail);
        count
    }

    /// Links a privately-built chain into the shared list and wakes the
    /// consumer. `chain_head` and `chain_tail` may be the same node.
    fn publish(&self, chain_head: *mut Node<T>, chain_tail: *mut Node<T>) {
        // The swap is the single synchronization point ordering producers
        // against each other: each producer's chain follows whichever node
        // it received as `prev`.
        let prev = self.tail.swap(chain_tail, Ordering::AcqRel);

        // Safety: `prev` cannot have been freed. The consumer only frees a
        // node after advancing past it, and it cannot advance past `prev`
        // until this store makes the link visible.
        unsafe { (*prev).next.store(chain_head, Ordering::Release) };

        self.notify_receiver();
    }

    /// Wakes the consumer if it's parked.
    ///
    /// If the consumer is spinning or processing, this is just an atomic
    /// load; the unpark syscall only happens when it has actually gone to
    /// sleep. The SeqCst load pairs with the SeqCst store in the consumer's
    /// park sequence (see `Receiver::recv`).
    #[inline]
    pub(crate) fn notify_receiver(&self) {
        if self.receiver_parked.load(Ordering::SeqCst) {
            self.unparker.unpark();
        }
    }

    /// Wakes the consumer regardless of the parked flag.
    ///
    /// Used on sender disconnect, where a missed wakeup would strand the
    /// consumer forever; the parker token makes a redundant unpark
    /// harmless.
    #[inline]
    pub(crate) fn wake_receiver(&self) {
        self.unparker.unpark();
    }

    // === Consumer operations ===

    /// Attempts to dequeue the next message.
    ///
    /// `head` is the consumer's position, held in the `Receiver`. On
    /// success the old head node is freed and `head` advances to the node
    /// whose value was taken (it becomes the new dummy).
    ///
    /// # Safety
    ///
    /// Must only be called from the single consumer thread, with the `head`
    /// pointer originating from this channel.
    #[inline]
    pub(crate) unsafe fn pop(&self, head: &mut *mut Node<T>) -> Option<T> {
        // Acquire pairs with the producer's release store in `publish`,
        // making the node's value visible before we read it.
        let next = unsafe { (**head).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }

        // Safety: every node past the head was published with an
        // initialized value, and each value is taken exactly once because
        // only this thread advances `head`.
        let value = unsafe { (*next).value.assume_init_read() };

        let consumed = *head;
        *head = next;

        // Safety: `consumed` is fully detached: no producer can reach it
        // (tail already moved past it) and its value slot is spent.
        unsafe { Node::free(consumed) };

        Some(value)
    }

    /// Whether the queue holds no visible messages.
    ///
    /// # Safety
    ///
    /// Consumer-only, same contract as [`Channel::pop`].
    #[inline]
    pub(crate) unsafe fn is_empty(&self, head: *mut Node<T>) -> bool {
        unsafe { (*head).next.load(Ordering::Acquire) }.is_null()
    }

    /// Counts visible messages by walking the list from `head`.
    ///
    /// Best-effort only: concurrent producers may append while we walk, so
    /// the result can be stale the instant it returns.
    ///
    /// # Safety
    ///
    /// Consumer-only, same contract as [`Channel::pop`].
    pub(crate) unsafe fn len_walk(&self, head: *mut Node<T>) -> usize {
        let mut len = 0;
        let mut node = unsafe { (*head).next.load(Ordering::Acquire) };
        while !node.is_null() {
            len += 1;
            node = unsafe { (*node).next.load(Ordering::Acquire) };
        }
        len
    }

    /// The consumer's initial position: the dummy node.
    pub(crate) fn initial_head(&self) -> *mut Node<T> {
        self.head.load(Ordering::Relaxed)
    }

    /// Syncs the consumer's position back into the header.
    ///
    /// Called from `Receiver::drop` so the final `release` can drain from
    /// the right place. The release ordering pairs with the acquire in the
    /// refcount decrement that performs teardown.
    pub(crate) fn store_head(&self, head: *mut Node<T>) {
        self.head.store(head, Ordering::Release);
    }

    // === Parking flag ===

    /// Marks the consumer as committed to parking.
    ///
    /// SeqCst so that this store and a producer's `receiver_parked` load
    /// are totally ordered against the queue operations between them:
    /// either the producer sees the flag and unparks, or the consumer's
    /// post-flag pop sees the producer's message. See the crate docs for
    /// the full argument.
    #[inline]
    pub(crate) fn set_parked(&self) {
        self.receiver_parked.store(true, Ordering::SeqCst);
    }

    /// Clears the parked flag after waking.
    #[inline]
    pub(crate) fn clear_parked(&self) {
        self.receiver_parked.store(false, Ordering::Relaxed);
    }

    // === Liveness ===

    #[inline]
    pub(crate) fn add_sender(&self) {
        self.sender_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the sender count, returning the previous value.
    ///
    /// The release half of AcqRel makes every message this sender published
    /// visible to a consumer that acquires the count at zero.
    #[inline]
    pub(crate) fn remove_sender(&self) -> usize {
        self.sender_count.fetch_sub(1, Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn sender_count(&self) -> usize {
        self.sender_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_receiver_disconnected(&self) -> bool {
        self.receiver_disconnected.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_receiver_disconnected(&self) {
        self.receiver_disconnected.store(true, Ordering::Release);
    }

    // === Lifecycle ===

    pub(crate) fn acquire(this: NonNull<Self>) {
        unsafe {
            this.as_ref().ref_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops one reference. The last reference drains and frees the list,
    /// then frees the header.
    pub(crate) unsafe fn release(this: NonNull<Self>) {
        let inner = unsafe { this.as_ref() };

        if inner.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            unsafe {
                // Sole owner now; the receiver synced its head before its
                // own release, so the walk starts at the true position.
                let mut head = inner.head.load(Ordering::Relaxed);

                // Drain unreceived messages (their destructors run), then
                // free the final dummy.
                while inner.pop(&mut head).is_some() {}
                Node::free(head);

                drop(Box::from_raw(this.as_ptr()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::sync::Parker;

    fn raw_channel<T>() -> NonNull<Channel<T>> {
        let parker = Parker::new();
        Channel::allocate(parker.unparker().clone())
    }

    unsafe fn release_both<T>(chan: NonNull<Channel<T>>) {
        unsafe {
            Channel::release(chan);
            Channel::release(chan);
        }
    }

    #[test]
    fn push_pop_fifo() {
        let chan = raw_channel::<u64>();

        unsafe {
            let inner = chan.as_ref();
            let mut head = inner.initial_head();

            inner.push(1);
            inner.push(2);
            inner.push(3);

            assert_eq!(inner.pop(&mut head), Some(1));
            assert_eq!(inner.pop(&mut head), Some(2));
            assert_eq!(inner.pop(&mut head), Some(3));
            assert_eq!(inner.pop(&mut head), None);

            inner.store_head(head);
            release_both(chan);
        }
    }

    #[test]
    fn empty_queue_has_null_next() {
        let chan = raw_channel::<u64>();

        unsafe {
            let inner = chan.as_ref();
            let head = inner.initial_head();

            assert!(inner.is_empty(head));
            assert_eq!(inner.len_walk(head), 0);

            release_both(chan);
        }
    }

    #[test]
    fn batch_publishes_in_order() {
        let chan = raw_channel::<u64>();

        unsafe {
            let inner = chan.as_ref();
            let mut head = inner.initial_head();

            assert_eq!(inner.push_batch([10, 20, 30].into_iter()), 3);
            assert_eq!(inner.len_walk(head), 3);

            assert_eq!(inner.pop(&mut head), Some(10));
            assert_eq!(inner.pop(&mut head), Some(20));
            assert_eq!(inner.pop(&mut head), Some(30));
            assert_eq!(inner.pop(&mut head), None);

            inner.store_head(head);
            release_both(chan);
        }
    }

    #[test]
    fn empty_batch_leaves_queue_untouched() {
        let chan = raw_channel::<u64>();

        unsafe {
            let inner = chan.as_ref();
            let head = inner.initial_head();

            assert_eq!(inner.push_batch(std::iter::empty()), 0);
            assert!(inner.is_empty(head));

            release_both(chan);
        }
    }

    #[test]
    fn batch_then_single_interleave() {
        let chan = raw_channel::<u64>();

        unsafe {
            let inner = chan.as_ref();
            let mut head = inner.initial_head();

            inner.push(1);
            inner.push_batch([2, 3].into_iter());
            inner.push(4);

            for expected in 1..=4 {
                assert_eq!(inner.pop(&mut head), Some(expected));
            }

            inner.store_head(head);
            release_both(chan);
        }
    }

    #[test]
    fn teardown_drops_unreceived_values() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicUsize;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let chan = raw_channel::<DropCounter>();

        unsafe {
            let inner = chan.as_ref();
            let mut head = inner.initial_head();

            inner.push(DropCounter(Arc::clone(&drops)));
            inner.push(DropCounter(Arc::clone(&drops)));
            inner.push(DropCounter(Arc::clone(&drops)));

            // Consume one; two remain in the list at teardown.
            drop(inner.pop(&mut head));
            assert_eq!(drops.load(Ordering::SeqCst), 1);

            inner.store_head(head);
            release_both(chan);
        }

        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn sender_count_bookkeeping() {
        let chan = raw_channel::<u64>();

        unsafe {
            let inner = chan.as_ref();

            assert_eq!(inner.sender_count(), 1);
            inner.add_sender();
            assert_eq!(inner.sender_count(), 2);
            assert_eq!(inner.remove_sender(), 2);
            assert_eq!(inner.remove_sender(), 1);
            assert_eq!(inner.sender_count(), 0);

            release_both(chan);
        }
    }
}
