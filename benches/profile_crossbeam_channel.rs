//! Latency and throughput comparison against crossbeam-channel (unbounded)
//!
//! For best results, disable turbo boost and pin to physical cores:
//!   echo 1 | sudo tee /sys/devices/system/cpu/intel_pstate/no_turbo
//!   sudo taskset -c 0,2 ./target/release/deps/profile_crossbeam_channel-*

use std::thread;
use std::time::Instant;

use crossbeam_channel::unbounded;
use hdrhistogram::Histogram;

use relay_channel::channel;

const WARMUP: u64 = 10_000;
const SAMPLES: u64 = 100_000;
const THROUGHPUT_COUNT: u64 = 10_000_000;

#[cfg(target_arch = "x86_64")]
#[inline]
fn rdtscp() -> u64 {
    unsafe {
        let mut aux: u32 = 0;
        core::arch::x86_64::__rdtscp(&mut aux)
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn rdtscp() -> u64 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

fn latency_relay() -> Histogram<u64> {
    let (tx_fwd, mut rx_fwd) = channel::<u64>();
    let (tx_ret, mut rx_ret) = channel::<u64>();

    let total = WARMUP + SAMPLES;

    let echo = thread::spawn(move || {
        for _ in 0..total {
            let val = rx_fwd.recv().unwrap();
            tx_ret.send(val).unwrap();
        }
    });

    let mut hist = Histogram::<u64>::new(3).unwrap();
    for i in 0..total {
        let start = rdtscp();
        tx_fwd.send(i).unwrap();
        rx_ret.recv().unwrap();
        let rtt = rdtscp() - start;
        if i >= WARMUP {
            hist.record(rtt / 2).unwrap();
        }
    }

    echo.join().unwrap();
    hist
}

fn latency_crossbeam() -> Histogram<u64> {
    let (tx_fwd, rx_fwd) = unbounded::<u64>();
    let (tx_ret, rx_ret) = unbounded::<u64>();

    let total = WARMUP + SAMPLES;

    let echo = thread::spawn(move || {
        for _ in 0..total {
            let val = rx_fwd.recv().unwrap();
            tx_ret.send(val).unwrap();
        }
    });

    let mut hist = Histogram::<u64>::new(3).unwrap();
    for i in 0..total {
        let start = rdtscp();
        tx_fwd.send(i).unwrap();
        rx_ret.recv().unwrap();
        let rtt = rdtscp() - start;
        if i >= WARMUP {
            hist.record(rtt / 2).unwrap();
        }
    }

    echo.join().unwrap();
    hist
}

fn print_histogram(name: &str, hist: &Histogram<u64>) {
    println!(
        "{name:<20} p50={:>7} p99={:>7} p99.9={:>7} max={:>8}",
        hist.value_at_quantile(0.50),
        hist.value_at_quantile(0.99),
        hist.value_at_quantile(0.999),
        hist.max(),
    );
}

fn throughput_relay() -> f64 {
    let (tx, mut rx) = channel::<u64>();

    let start = Instant::now();

    let producer = thread::spawn(move || {
        for i in 0..THROUGHPUT_COUNT {
            tx.send(i).unwrap();
        }
    });

    let consumer = thread::spawn(move || {
        let mut received = 0u64;
        while received < THROUGHPUT_COUNT {
            rx.recv().unwrap();
            received += 1;
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();

    THROUGHPUT_COUNT as f64 / start.elapsed().as_secs_f64()
}

fn throughput_crossbeam() -> f64 {
    let (tx, rx) = unbounded::<u64>();

    let start = Instant::now();

    let producer = thread::spawn(move || {
        for i in 0..THROUGHPUT_COUNT {
            tx.send(i).unwrap();
        }
    });

    let consumer = thread::spawn(move || {
        let mut received = 0u64;
        while received < THROUGHPUT_COUNT {
            rx.recv().unwrap();
            received += 1;
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();

    THROUGHPUT_COUNT as f64 / start.elapsed().as_secs_f64()
}

fn main() {
    println!("=== Latency (ping-pong RTT/2, cycles) ===");
    print_histogram("relay-channel", &latency_relay());
    print_histogram("crossbeam-channel", &latency_crossbeam());
    println!();

    println!("=== Throughput (1 producer, 1 consumer) ===");
    println!("relay-channel        {:>6.1} M msgs/sec", throughput_relay() / 1e6);
    println!("crossbeam-channel    {:>6.1} M msgs/sec", throughput_crossbeam() / 1e6);
}
