// Fixed-capacity FIFO shared by the producers and the flusher.  This is a crossbeam bounded channel
// of which we hold both ends, so the channel never disconnects while the queue exists and all the
// synchronization is the channel's own.

use std::time::{Duration, Instant};

use crossbeam::channel;

pub struct BoundedQueue<T> {
    sender: channel::Sender<T>,
    receiver: channel::Receiver<T>,
    capacity: usize,
}

pub enum Offer<T> {
    Accepted,
    // The wait expired with the queue still full; the item is handed back.
    TimedOut(T),
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> BoundedQueue<T> {
        // A zero-capacity crossbeam channel is a rendezvous channel, which is not a queue at all.
        assert!(capacity > 0, "Queue capacity must be positive");
        let (sender, receiver) = channel::bounded(capacity);
        BoundedQueue {
            sender,
            receiver,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    // Wait up to `timeout` for space.  A zero timeout is a plain try.
    pub fn offer(&self, item: T, timeout: Duration) -> Offer<T> {
        match self.sender.send_timeout(item, timeout) {
            Ok(()) => Offer::Accepted,
            Err(channel::SendTimeoutError::Timeout(item)) => Offer::TimedOut(item),
            Err(channel::SendTimeoutError::Disconnected(_)) => {
                // We own the receiver.
                panic!("Queue receiver disconnected")
            }
        }
    }

    // Wait for space until `deadline`, or forever if there is none.  At least one attempt is made
    // even if the deadline has already passed.  The wait is broken into slices of at most `slice`,
    // and `give_up` is consulted between slices; if it returns true the item is handed back.
    pub fn offer_until(
        &self,
        mut item: T,
        deadline: Option<Instant>,
        slice: Duration,
        give_up: &dyn Fn() -> bool,
    ) -> Offer<T> {
        loop {
            let wait = match deadline {
                Some(d) => std::cmp::min(slice, d.saturating_duration_since(Instant::now())),
                None => slice,
            };
            match self.offer(item, wait) {
                Offer::Accepted => return Offer::Accepted,
                Offer::TimedOut(it) => {
                    item = it;
                    let expired = matches!(deadline, Some(d) if Instant::now() >= d);
                    if expired || give_up() {
                        return Offer::TimedOut(item);
                    }
                }
            }
        }
    }

    pub fn poll(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    // Move everything that is queued right now onto the end of `into`, in FIFO order.  Items that
    // arrive while we're draining stay in the queue for the next drain.  Returns the number moved.
    pub fn drain_to(&self, into: &mut Vec<T>) -> usize {
        let n = self.receiver.len();
        into.reserve(n);
        let mut moved = 0;
        while moved < n {
            match self.receiver.try_recv() {
                Ok(item) => {
                    into.push(item);
                    moved += 1;
                }
                Err(_) => break,
            }
        }
        moved
    }
}

#[test]
pub fn test_queue_bounded() {
    let q = BoundedQueue::new(3);
    for i in 0..3 {
        assert!(matches!(q.offer(i, Duration::ZERO), Offer::Accepted));
    }
    assert!(q.len() == 3);
    match q.offer(3, Duration::from_millis(10)) {
        Offer::TimedOut(x) => assert!(x == 3),
        Offer::Accepted => panic!("Queue overfilled"),
    }
    assert!(q.len() == 3);
}

#[test]
pub fn test_queue_fifo_drain() {
    let q = BoundedQueue::new(10);
    for i in 0..5 {
        assert!(matches!(q.offer(i, Duration::ZERO), Offer::Accepted));
    }
    let first = q.poll().unwrap();
    let mut batch = vec![first];
    assert!(q.drain_to(&mut batch) == 4);
    assert!(batch == vec![0, 1, 2, 3, 4]);
    assert!(q.is_empty());
    assert!(q.poll().is_none());
    assert!(q.drain_to(&mut batch) == 0);
}

#[test]
pub fn test_queue_offer_until_gives_up() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let q = BoundedQueue::new(1);
    assert!(matches!(q.offer(0, Duration::ZERO), Offer::Accepted));
    let asked = AtomicUsize::new(0);
    let give_up = || asked.fetch_add(1, Ordering::SeqCst) >= 2;
    match q.offer_until(1, None, Duration::from_millis(5), &give_up) {
        Offer::TimedOut(x) => assert!(x == 1),
        Offer::Accepted => panic!("Queue overfilled"),
    }
    assert!(asked.load(Ordering::SeqCst) == 3);
}

#[test]
pub fn test_queue_offer_until_deadline() {
    let q = BoundedQueue::new(1);
    assert!(matches!(q.offer(0, Duration::ZERO), Offer::Accepted));
    let start = Instant::now();
    let deadline = Some(start + Duration::from_millis(30));
    let never = || false;
    assert!(matches!(
        q.offer_until(1, deadline, Duration::from_millis(10), &never),
        Offer::TimedOut(1)
    ));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
pub fn test_queue_offer_until_past_deadline() {
    let q = BoundedQueue::new(1);
    let never = || false;
    let past = Some(Instant::now());
    assert!(matches!(
        q.offer_until(0, past, Duration::from_millis(10), &never),
        Offer::Accepted
    ));
    assert!(matches!(
        q.offer_until(1, past, Duration::from_millis(10), &never),
        Offer::TimedOut(1)
    ));
}
