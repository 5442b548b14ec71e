// Operation counters.  The enqueue-side counters are bumped by producers and the flush-side ones by
// the flusher only, but everything is read concurrently by whoever asks for stats, hence atomics.
// Relaxed ordering is enough: no counter is used to synchronize anything else.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Counters {
    enqueued: AtomicU64,
    enqueue_timeout: AtomicU64,
    enqueue_cooloff: AtomicU64,
    dequeued: AtomicU64,
    sent: AtomicU64,
    lost: AtomicU64,
    longest_burst: AtomicU64,
}

// A plain copy of the counters at one point in time.  The fields are read one at a time, so a
// snapshot taken while the writer is busy need not be mutually consistent.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Stats {
    pub enqueued: u64,
    pub enqueue_timeout: u64,
    pub enqueue_cooloff: u64,
    pub dequeued: u64,
    pub sent: u64,
    pub lost: u64,
    pub queue_length: usize,
    pub longest_burst: u64,
}

impl Counters {
    pub fn new() -> Counters {
        Counters {
            ..Default::default()
        }
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_enqueue_timeout(&self) {
        self.enqueue_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_enqueue_cooloff(&self) {
        self.enqueue_cooloff.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dequeued(&self, n: usize) {
        self.dequeued.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_sent(&self, n: usize) {
        self.sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_lost(&self, n: usize) {
        self.lost.fetch_add(n as u64, Ordering::Relaxed);
    }

    // Returns true if `burst` is a new record.
    pub fn record_burst(&self, burst: usize) -> bool {
        let burst = burst as u64;
        self.longest_burst.fetch_max(burst, Ordering::Relaxed) < burst
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn enqueue_timeout(&self) -> u64 {
        self.enqueue_timeout.load(Ordering::Relaxed)
    }

    pub fn enqueue_cooloff(&self) -> u64 {
        self.enqueue_cooloff.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn longest_burst(&self) -> u64 {
        self.longest_burst.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, queue_length: usize) -> Stats {
        Stats {
            enqueued: self.enqueued(),
            enqueue_timeout: self.enqueue_timeout(),
            enqueue_cooloff: self.enqueue_cooloff(),
            dequeued: self.dequeued(),
            sent: self.sent(),
            lost: self.lost(),
            queue_length,
            longest_burst: self.longest_burst(),
        }
    }
}

#[test]
pub fn test_counters() {
    let c = Counters::new();
    c.inc_enqueued();
    c.inc_enqueued();
    c.inc_enqueue_timeout();
    c.inc_enqueue_cooloff();
    c.add_dequeued(2);
    c.add_sent(1);
    c.add_lost(1);
    let s = c.snapshot(7);
    assert!(
        s == Stats {
            enqueued: 2,
            enqueue_timeout: 1,
            enqueue_cooloff: 1,
            dequeued: 2,
            sent: 1,
            lost: 1,
            queue_length: 7,
            longest_burst: 0,
        }
    );
}

#[test]
pub fn test_longest_burst_is_high_water_mark() {
    let c = Counters::new();
    assert!(c.record_burst(5));
    assert!(!c.record_burst(2));
    assert!(c.longest_burst() == 5);
    assert!(!c.record_burst(5));
    assert!(c.record_burst(6));
    assert!(c.longest_burst() == 6);
}
