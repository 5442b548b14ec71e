// Writer tests.  Most of these drive flush cycles by hand through drain_into() so that they do not
// race a flusher thread; the lifecycle tests start a real flusher with a short ticker.

use crate::config::WriterConfig;
use crate::datasink::DataSink;
use crate::deferred::Deferred;
use crate::writer::{Writer, STOP_GRACE};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Batches = Arc<Mutex<Vec<Vec<u64>>>>;

// A sink that remembers every batch it is handed, or fails every flush.
struct MockSink {
    batches: Batches,
    fail: bool,
}

impl MockSink {
    fn new() -> MockSink {
        MockSink {
            batches: Arc::new(Mutex::new(vec![])),
            fail: false,
        }
    }

    fn with_failure(self) -> MockSink {
        MockSink { fail: true, ..self }
    }

    fn with_batches(self, batches: &Batches) -> MockSink {
        MockSink {
            batches: batches.clone(),
            ..self
        }
    }

    fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.lock().unwrap().clone()
    }
}

impl DataSink<u64> for MockSink {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn flush(&mut self, batch: Vec<u64>) -> Result<(), String> {
        if self.fail {
            return Err("Mock failure".to_string());
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

// A sink whose flush takes a long time, and which tells us when it is flushing and when it has
// been closed.
struct SlowSink {
    delay: Duration,
    flushing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl DataSink<u64> for SlowSink {
    fn name(&self) -> String {
        "slow".to_string()
    }

    fn flush(&mut self, _batch: Vec<u64>) -> Result<(), String> {
        self.flushing.store(true, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn test_config(queue_length: usize) -> WriterConfig {
    WriterConfig::new("test")
        .with_enabled(true)
        .with_queue_length(queue_length)
        .with_enqueue_timeout(Some(Duration::from_millis(10)))
}

// A writer whose every start() opens a sink that appends to `batches`.
fn connected_writer(cfg: WriterConfig, batches: &Batches) -> Writer<u64> {
    let batches = batches.clone();
    Writer::new(
        cfg,
        Box::new(move || -> Result<Box<dyn DataSink<u64>>, String> {
            Ok(Box::new(MockSink::new().with_batches(&batches)))
        }),
    )
}

// A writer that can't connect to anything, for tests that drive cycles by hand.
fn unconnected_writer(cfg: WriterConfig) -> Writer<u64> {
    Writer::new(
        cfg,
        Box::new(|| -> Result<Box<dyn DataSink<u64>>, String> {
            Err("Nothing to connect to".to_string())
        }),
    )
}

fn wait_for(what: impl Fn() -> bool) -> bool {
    let limit = Instant::now() + Duration::from_secs(5);
    while Instant::now() < limit {
        if what() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
pub fn test_bounded_capacity() {
    let w = unconnected_writer(test_config(3));
    for i in 0..3 {
        assert!(w.write(i));
    }
    let then = Instant::now();
    assert!(!w.write(3));
    assert!(then.elapsed() >= Duration::from_millis(10));
    assert!(w.ops_enqueued() == 3);
    assert!(w.ops_enqueue_timeout() == 1);
    assert!(w.queue_length() == 3);
    assert!(w.cooloff_deadline().is_some());
}

#[test]
pub fn test_drain_completeness_and_order() {
    let w = unconnected_writer(test_config(10));
    let mut sink = MockSink::new();
    for i in 1..=5 {
        assert!(w.write(i));
    }
    assert!(w.drain_into(&mut sink) == 5);
    assert!(w.queue_length() == 0);
    assert!(w.ops_dequeued() == 5);
    assert!(w.ops_sent() == 5);
    assert!(w.ops_lost() == 0);
    assert!(sink.batches() == vec![vec![1, 2, 3, 4, 5]]);

    // An idle cycle does not call the sink.
    assert!(w.drain_into(&mut sink) == 0);
    assert!(sink.batches().len() == 1);
}

#[test]
pub fn test_cooloff_gating() {
    let cfg = test_config(1).with_failure_cooloff(Duration::from_millis(200));
    let w = unconnected_writer(cfg);
    let mut sink = MockSink::new();
    assert!(w.write(1));
    assert!(!w.write(2));
    assert!(w.ops_enqueue_timeout() == 1);
    assert!(w.ops_enqueue_cooloff() == 0);

    // Rejected at once, without waiting for the queue, even when there's room.
    assert!(w.drain_into(&mut sink) == 1);
    let then = Instant::now();
    assert!(!w.write(3));
    assert!(then.elapsed() < Duration::from_millis(10));
    assert!(w.ops_enqueue_timeout() == 1);
    assert!(w.ops_enqueue_cooloff() == 1);

    thread::sleep(Duration::from_millis(300));
    assert!(w.write(4));
    assert!(w.cooloff_deadline().is_none());
    assert!(w.ops_enqueued() == 2);
}

#[test]
pub fn test_cooloff_not_extended() {
    let w = unconnected_writer(test_config(1));
    assert!(w.write(1));
    assert!(!w.write(2));
    let first = w.cooloff_deadline().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(!w.write(3));
    assert!(!w.write(4));
    assert!(w.cooloff_deadline() == Some(first));
    assert!(w.ops_enqueue_cooloff() == 2);
}

#[test]
pub fn test_lost_on_sink_failure() {
    let w = unconnected_writer(test_config(10));
    let mut sink = MockSink::new().with_failure();
    for i in 0..4 {
        assert!(w.write(i));
    }
    assert!(w.drain_into(&mut sink) == 4);
    assert!(w.ops_lost() == 4);
    assert!(w.ops_sent() == 0);
    assert!(w.ops_dequeued() == 4);

    // Not requeued.
    assert!(w.queue_length() == 0);
    assert!(w.drain_into(&mut sink) == 0);
    assert!(w.ops_lost() == 4);
}

#[test]
pub fn test_scenario() {
    let w = unconnected_writer(test_config(3).with_failure_cooloff(Duration::from_millis(1000)));
    let mut sink = MockSink::new();
    for i in 0..3 {
        assert!(w.write_deferred(Deferred::new(move || Ok(i))));
    }
    assert!(w.ops_enqueued() == 3);

    w.drain_into(&mut sink);
    assert!(w.ops_dequeued() == 3);
    assert!(w.ops_sent() == 3);
    assert!(w.queue_length() == 0);

    for i in 3..6 {
        assert!(w.write_deferred(Deferred::new(move || Ok(i))));
    }
    assert!(!w.write(6));
    assert!(w.ops_enqueue_timeout() == 1);
    assert!(w.cooloff_deadline().is_some());

    assert!(!w.write(7));
    assert!(w.ops_enqueue_cooloff() == 1);

    // The queue has to have room for the write after the cooloff to get in.
    w.drain_into(&mut sink);
    thread::sleep(Duration::from_millis(1100));
    assert!(w.write(8));
    assert!(w.ops_enqueued() == 7);
}

// A flush does not lift the cooloff, only time does.
#[test]
pub fn test_cooloff_with_queue_flush() {
    let w = unconnected_writer(test_config(5).with_failure_cooloff(Duration::from_millis(1000)));
    let mut sink = MockSink::new();
    let mut count = 0;
    while w.write(count) {
        count += 1;
    }
    assert!(count == 5);
    assert!(sink.batches().len() == 0);

    w.drain_into(&mut sink);
    assert!(sink.batches() == vec![vec![0, 1, 2, 3, 4]]);
    assert!(!w.write(10));
    thread::sleep(Duration::from_millis(500));
    assert!(!w.write(11));
    thread::sleep(Duration::from_millis(600));
    assert!(w.write(12));
}

// With the queue stuck full, an expired cooloff is re-armed by the next timeout, so we see one
// timeout per cooloff period and cooloff rejections in between.
#[test]
pub fn test_cooloff_without_queue_flush() {
    let w = unconnected_writer(test_config(5).with_failure_cooloff(Duration::from_millis(200)));
    let mut count = 0;
    while w.write(count) {
        count += 1;
    }
    assert!(count == 5);
    thread::sleep(Duration::from_millis(220));
    for i in 0..10 {
        assert!(!w.write(100 + i));
        thread::sleep(Duration::from_millis(50));
    }
    assert!(w.ops_enqueue_timeout() + w.ops_enqueue_cooloff() == 11);
    assert!(w.ops_enqueue_timeout() >= 2);
    assert!(w.ops_enqueue_cooloff() >= 1);
    assert!(w.ops_enqueued() == 5);
}

#[test]
pub fn test_longest_burst() {
    let w = unconnected_writer(test_config(10));
    let mut sink = MockSink::new();
    for i in 0..5 {
        w.write(i);
    }
    w.drain_into(&mut sink);
    assert!(w.longest_burst() == 5);
    for i in 0..2 {
        w.write(i);
    }
    w.drain_into(&mut sink);
    assert!(w.longest_burst() == 5);
    assert!(w.stats().longest_burst == 5);
}

#[test]
pub fn test_disabled_writer() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = connected_writer(test_config(3).with_enabled(false), &batches);
    w.start();
    assert!(!w.is_running());
    assert!(!w.write(1));
    assert!(!w.write_deferred(Deferred::new(|| Ok(2))));
    assert!(w.stats() == Default::default());
    w.stop();
}

#[test]
pub fn test_deferred_failure_skipped() {
    let w = unconnected_writer(test_config(10));
    let mut sink = MockSink::new();
    assert!(w.write(1));
    assert!(w.write_deferred(Deferred::new(|| Err("No can do".to_string()))));
    assert!(w.write_deferred(Deferred::new(|| panic!("Oops"))));
    assert!(w.write(4));
    assert!(w.drain_into(&mut sink) == 4);
    assert!(sink.batches() == vec![vec![1, 4]]);
    assert!(w.ops_dequeued() == 4);
    assert!(w.ops_sent() == 2);
    assert!(w.ops_lost() == 2);
}

#[test]
pub fn test_all_deferred_failed() {
    let w = unconnected_writer(test_config(10));
    let mut sink = MockSink::new();
    w.write_deferred(Deferred::new(|| Err("No".to_string())));
    w.write_deferred(Deferred::new(|| Err("Still no".to_string())));
    assert!(w.drain_into(&mut sink) == 2);
    assert!(sink.batches().len() == 0);
    assert!(w.ops_lost() == 2);
    assert!(w.longest_burst() == 2);
}

#[test]
pub fn test_deferred_evaluated_on_flush() {
    let w = unconnected_writer(test_config(10));
    let mut sink = MockSink::new();
    let evaluated = Arc::new(AtomicBool::new(false));
    let flag = evaluated.clone();
    assert!(w.write_deferred(Deferred::new(move || {
        flag.store(true, Ordering::SeqCst);
        Ok(42)
    })));
    assert!(!evaluated.load(Ordering::SeqCst));
    w.drain_into(&mut sink);
    assert!(evaluated.load(Ordering::SeqCst));
    assert!(sink.batches() == vec![vec![42]]);
}

#[test]
pub fn test_run_cycle_without_sink() {
    let w = unconnected_writer(test_config(10));
    w.write(1);
    w.write(2);
    assert!(w.run_cycle() == 0);
    assert!(w.queue_length() == 2);
    assert!(w.ops_dequeued() == 0);
}

#[test]
pub fn test_start_stop() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = connected_writer(
        test_config(10).with_ticker_interval(Duration::from_millis(10)),
        &batches,
    );
    // Accepted before start, sent after.
    assert!(w.write(1));
    w.start();
    assert!(w.is_running());
    assert!(w.write(2));
    assert!(w.write(3));
    assert!(wait_for(|| w.ops_sent() == 3));
    w.stop();
    assert!(!w.is_running());
    let sent = batches.lock().unwrap().concat();
    assert!(sent == vec![1, 2, 3]);
    assert!(w.ops_lost() == 0);
}

#[test]
pub fn test_restart() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = connected_writer(
        test_config(10).with_ticker_interval(Duration::from_millis(10)),
        &batches,
    );
    w.start();
    w.stop();
    w.start();
    assert!(w.write(7));
    assert!(wait_for(|| w.ops_sent() == 1));
    w.stop();
    assert!(batches.lock().unwrap().concat() == vec![7]);
}

#[test]
#[should_panic]
pub fn test_double_start() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = connected_writer(test_config(10), &batches);
    w.start();
    w.start();
}

#[test]
#[should_panic]
pub fn test_write_after_stop() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = connected_writer(test_config(10), &batches);
    w.start();
    w.stop();
    w.write(1);
}

#[test]
pub fn test_stop_never_started() {
    let w = unconnected_writer(test_config(10));
    w.stop();
    assert!(!w.is_running());
    assert!(w.write(1));
}

#[test]
pub fn test_connect_failure() {
    let w = unconnected_writer(test_config(10));
    w.start();
    assert!(!w.is_running());
    assert!(!w.write(1));
    assert!(w.stats() == Default::default());
    // Nothing to stop.
    w.stop();
}

#[test]
pub fn test_stop_discards_queue() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = connected_writer(
        test_config(10).with_ticker_interval(Duration::from_secs(3600)),
        &batches,
    );
    w.start();
    // Once this has been sent the flusher is asleep for the rest of the test.
    assert!(w.write(1));
    assert!(wait_for(|| w.ops_sent() == 1));
    for i in 2..5 {
        assert!(w.write(i));
    }
    let then = Instant::now();
    w.stop();
    assert!(then.elapsed() < Duration::from_secs(1));
    assert!(w.queue_length() == 0);
    assert!(w.ops_lost() == 3);
    assert!(w.ops_sent() == 1);
    assert!(batches.lock().unwrap().concat() == vec![1]);
}

#[test]
pub fn test_concurrent_producers() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = Arc::new(connected_writer(
        test_config(100)
            .with_ticker_interval(Duration::from_millis(5))
            .with_enqueue_timeout(None),
        &batches,
    ));
    w.start();
    let mut producers = vec![];
    for p in 0..4u64 {
        let w = w.clone();
        producers.push(thread::spawn(move || {
            for i in 0..250u64 {
                assert!(w.write(p * 1000 + i));
            }
        }));
    }
    for p in producers {
        p.join().unwrap();
    }
    assert!(wait_for(|| w.ops_sent() == 1000));
    w.stop();
    assert!(w.ops_enqueued() == 1000);
    assert!(w.ops_dequeued() == 1000);

    // Every producer's records arrive in the order it wrote them.
    let sent = batches.lock().unwrap().concat();
    for p in 0..4u64 {
        let mine = sent
            .iter()
            .filter(|x| **x / 1000 == p)
            .copied()
            .collect::<Vec<u64>>();
        assert!(mine == (0..250).map(|i| p * 1000 + i).collect::<Vec<u64>>());
    }
}

#[test]
pub fn test_stats_snapshot() {
    let w = unconnected_writer(test_config(2));
    let mut sink = MockSink::new();
    w.write(1);
    w.write(2);
    w.write(3);
    w.write(4);
    w.drain_into(&mut sink);
    // Still cooling off from the timeout of 3.
    w.write(5);
    let s = w.stats();
    assert!(s.enqueued == 2);
    assert!(s.enqueue_timeout == 1);
    assert!(s.enqueue_cooloff == 2);
    assert!(s.dequeued == 2);
    assert!(s.sent == 2);
    assert!(s.lost == 0);
    assert!(s.queue_length == 0);
    assert!(s.longest_burst == 2);
    assert!(s.enqueued == w.ops_enqueued() && s.lost == w.ops_lost());
}

#[test]
pub fn test_zero_enqueue_timeout() {
    let w = unconnected_writer(test_config(2).with_enqueue_timeout(Some(Duration::ZERO)));
    assert!(w.write(1));
    assert!(w.write(2));
    assert!(w.ops_enqueue_timeout() == 0);
    let then = Instant::now();
    assert!(!w.write(3));
    assert!(then.elapsed() < Duration::from_millis(100));
    assert!(w.ops_enqueued() == 2);
    assert!(w.ops_enqueue_timeout() == 1);

    let w = unconnected_writer(test_config(2).with_enqueue_timeout(Some(Duration::from_nanos(1))));
    assert!(w.write(1));
    assert!(w.ops_enqueued() == 1);
    assert!(w.cooloff_deadline().is_none());
}

#[test]
pub fn test_stop_does_not_wait_for_hung_sink() {
    let flushing = Arc::new(AtomicBool::new(false));
    let closed = Arc::new(AtomicBool::new(false));
    let (f, c) = (flushing.clone(), closed.clone());
    let w = Writer::new(
        test_config(10).with_ticker_interval(Duration::from_millis(10)),
        Box::new(move || -> Result<Box<dyn DataSink<u64>>, String> {
            Ok(Box::new(SlowSink {
                delay: Duration::from_secs(2),
                flushing: f.clone(),
                closed: c.clone(),
            }))
        }),
    );
    w.start();
    assert!(w.write(1));
    assert!(wait_for(|| flushing.load(Ordering::SeqCst)));

    let then = Instant::now();
    w.stop();
    assert!(then.elapsed() < STOP_GRACE + Duration::from_millis(300));
    assert!(!w.is_running());

    // Not closed under the flush, but closed by the flusher once the flush returns.
    assert!(!closed.load(Ordering::SeqCst));
    assert!(wait_for(|| closed.load(Ordering::SeqCst)));
    assert!(w.ops_sent() == 1);
}

#[test]
pub fn test_blocked_writer_sees_stop() {
    let batches = Arc::new(Mutex::new(vec![]));
    let w = Arc::new(connected_writer(
        test_config(1)
            .with_ticker_interval(Duration::from_secs(3600))
            .with_enqueue_timeout(None),
        &batches,
    ));
    w.start();
    // Once this has been sent the flusher is asleep for the rest of the test.
    assert!(w.write(1));
    assert!(wait_for(|| w.ops_sent() == 1));
    assert!(w.write(2));

    let producer = {
        let w = w.clone();
        thread::spawn(move || w.write(3))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!producer.is_finished());

    let then = Instant::now();
    w.stop();
    assert!(producer.join().is_err());
    assert!(then.elapsed() < STOP_GRACE + Duration::from_millis(300));
    assert!(w.ops_enqueued() == 2);
}
