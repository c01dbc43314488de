//! Leak verification via the `alloc-audit` node counters.
//!
//! Runs in its own process (integration test binary), so the global
//! counters see only this file's channels and must balance exactly.
//!
//! Run: cargo test --features alloc-audit --test alloc_audit

#![cfg(feature = "alloc-audit")]

use std::thread;

use relay_channel::{audit, channel};

#[test]
fn every_node_allocated_is_freed() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 2_000;

    {
        let (tx, mut rx) = channel::<u64>();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        tx.send(i).unwrap();
                    }
                    tx.send_batch(0..PER_PRODUCER).unwrap();
                })
            })
            .collect();

        drop(tx);

        // Receive roughly half, leave the rest for teardown to drain.
        for _ in 0..(PRODUCERS * PER_PRODUCER) {
            rx.recv().unwrap();
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    // Both handles dropped: every message node and the dummy are freed.
    assert_eq!(audit::node_allocs(), audit::node_frees());
    // 2 * PRODUCERS * PER_PRODUCER messages plus one dummy node.
    assert_eq!(
        audit::node_allocs(),
        (2 * PRODUCERS * PER_PRODUCER) as usize + 1
    );
}
