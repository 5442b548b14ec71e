// The cooloff deadline.  Only producers read or write it.
//
// The deadline is stored as nanoseconds past an origin instant taken when the Cooloff is created,
// with 0 meaning "unset".  A deadline is always at least `duration` past some `now` that is itself
// at or past the origin, so a set deadline is never 0 unless the duration is zero, and a zero-length
// cooloff is no cooloff at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const UNSET: u64 = 0;

pub struct Cooloff {
    origin: Instant,
    duration: Duration,
    deadline: AtomicU64,
}

impl Cooloff {
    pub fn new(duration: Duration) -> Cooloff {
        Cooloff {
            origin: Instant::now(),
            duration,
            deadline: AtomicU64::new(UNSET),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn offset(&self, t: Instant) -> u64 {
        let d = t.saturating_duration_since(self.origin);
        u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
    }

    // True if we are still damping at `now`.
    pub fn is_active(&self, now: Instant) -> bool {
        let deadline = self.deadline.load(Ordering::Acquire);
        deadline != UNSET && self.offset(now) < deadline
    }

    // The deadline as an instant, if one is set.  An expired deadline remains set until the next
    // successful enqueue clears it.
    pub fn deadline(&self) -> Option<Instant> {
        match self.deadline.load(Ordering::Acquire) {
            UNSET => None,
            d => Some(self.origin + Duration::from_nanos(d)),
        }
    }

    // Arm the cooloff at `now + duration` unless it is active.  Returns true if this call armed it.
    // The first failure wins: a failure while armed never pushes the deadline out.  A deadline that
    // has expired without being cleared counts as unset, so a new failure re-arms it.
    pub fn trip(&self, now: Instant) -> bool {
        let now = self.offset(now);
        let length = u64::try_from(self.duration.as_nanos()).unwrap_or(u64::MAX);
        let deadline = now.saturating_add(length);
        if deadline == UNSET {
            return false;
        }
        let mut current = self.deadline.load(Ordering::Acquire);
        loop {
            if current != UNSET && now < current {
                return false;
            }
            match self.deadline.compare_exchange(
                current,
                deadline,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn clear(&self) {
        self.deadline.store(UNSET, Ordering::Release);
    }
}

#[test]
pub fn test_cooloff_window() {
    let c = Cooloff::new(Duration::from_millis(1000));
    let t0 = Instant::now();
    assert!(!c.is_active(t0));
    assert!(c.deadline().is_none());
    assert!(c.trip(t0));
    assert!(c.is_active(t0));
    assert!(c.is_active(t0 + Duration::from_millis(999)));
    assert!(!c.is_active(t0 + Duration::from_millis(1000)));
    c.clear();
    assert!(!c.is_active(t0));
    assert!(c.deadline().is_none());
}

#[test]
pub fn test_cooloff_not_extended() {
    let c = Cooloff::new(Duration::from_millis(1000));
    let t0 = Instant::now();
    assert!(c.trip(t0));
    let first = c.deadline().unwrap();
    assert!(!c.trip(t0 + Duration::from_millis(500)));
    assert!(!c.trip(t0 + Duration::from_millis(999)));
    assert!(c.deadline().unwrap() == first);

    // Expired but not cleared: the next failure re-arms from its own time.
    assert!(!c.is_active(t0 + Duration::from_millis(5000)));
    assert!(c.trip(t0 + Duration::from_millis(6000)));
    assert!(c.deadline().unwrap() == first + Duration::from_millis(6000));
    assert!(c.is_active(t0 + Duration::from_millis(6500)));
}

#[test]
pub fn test_cooloff_concurrent_trips() {
    use std::sync::Arc;
    use std::thread;

    let c = Arc::new(Cooloff::new(Duration::from_secs(1)));
    let handles = (0..8)
        .map(|_| {
            let c = c.clone();
            thread::spawn(move || c.trip(Instant::now()))
        })
        .collect::<Vec<_>>();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert!(winners == 1);
}

#[test]
pub fn test_huge_cooloff() {
    let c = Cooloff::new(Duration::from_secs(6000000 * 3600));
    let t0 = Instant::now();
    assert!(c.trip(t0));
    assert!(c.is_active(t0 + Duration::from_secs(200 * 365 * 24 * 3600)));
    assert!(!c.trip(t0 + Duration::from_secs(1)));
}

#[test]
pub fn test_zero_cooloff_never_arms() {
    let c = Cooloff::new(Duration::ZERO);
    let t0 = Instant::now();
    assert!(!c.trip(t0));
    assert!(!c.is_active(t0));
}
