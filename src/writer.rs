// The buffered writer.
//
// Producers call write(), which puts a Deferred record into a bounded queue.  A single flusher
// thread wakes up every ticker interval, drains whatever is in the queue at that moment, evaluates
// the records and hands them to the sink as one batch.  Producers never see the sink; all they ever
// learn is whether their record was accepted into the queue.
//
// THREADS
//
// The Writer itself is shared among producers (it is Sync; wrap it in an Arc).  The state shared
// with the flusher lives in `Shared`.  The sink is opened by start() and lives in a slot that both
// the flusher and stop() can reach: the flusher holds the slot's lock while it flushes and closes
// the sink when it exits.  stop() waits a grace period for the flusher to exit and, if it does not,
// closes the sink itself only if no flush holds it; otherwise the abandoned flusher closes it when
// the flush returns.  Thus stop() never closes a sink under a flush in progress and never waits for
// a hung sink, and a flusher that finds the slot empty knows we're shutting down.
//
// BACKPRESSURE AND COOLOFF
//
// When the queue is full, write() waits for space, forever by default or up to the enqueue timeout
// if one is configured.  A timed-out write arms the cooloff, and until the cooloff expires every
// write fails at once without going near the queue.  The first successful write clears it.
//
// LIFECYCLE
//
// Writes are accepted before start(), they just accumulate.  After stop() the writer is shut down
// and a write is a programming error (panic) until the writer is started again.  A disabled writer
// ignores everything, as does a writer whose sink could not be opened on the last start().

use crate::config::WriterConfig;
use crate::cooloff::Cooloff;
use crate::counters::{Counters, Stats};
use crate::datasink::{DataSink, SinkConnector};
use crate::deferred::Deferred;
use crate::queue::{BoundedQueue, Offer};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;

// How long stop() waits for the flusher to notice it's been told to quit.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

// A producer blocked on a full queue without a timeout rechecks the shutdown state this often.
const BLOCKED_WRITE_RECHECK: Duration = Duration::from_millis(100);

type SinkSlot<R> = Arc<Mutex<Option<Box<dyn DataSink<R>>>>>;

struct Shared<R> {
    name: String,
    queue: BoundedQueue<Deferred<R>>,
    counters: Counters,
}

struct Flusher<R> {
    handle: thread::JoinHandle<()>,
    // The sink of this run.  A fresh slot per run, so that a flusher abandoned by stop() only ever
    // touches its own sink.
    sink: SinkSlot<R>,
    // Dropping this stops the flusher.
    stop: channel::Sender<()>,
    // Closed by the flusher as it exits.
    done: channel::Receiver<()>,
}

struct Lifecycle<R> {
    flusher: Option<Flusher<R>>,
}

pub struct Writer<R> {
    config: WriterConfig,
    connector: Box<dyn SinkConnector<R>>,
    shared: Arc<Shared<R>>,
    cooloff: Cooloff,
    // Set by stop(), cleared by a successful start().
    shut_down: AtomicBool,
    // Set when the last start() could not open the sink.
    sink_unavailable: AtomicBool,
    lifecycle: Mutex<Lifecycle<R>>,
}

impl<R: Send + 'static> Writer<R> {
    // Panics if the configuration is invalid, as a zero-length queue is a programming error.
    pub fn new(config: WriterConfig, connector: Box<dyn SinkConnector<R>>) -> Writer<R> {
        if let Err(e) = config.validate() {
            panic!("{e}");
        }
        Writer {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                queue: BoundedQueue::new(config.queue_length),
                counters: Counters::new(),
            }),
            cooloff: Cooloff::new(config.failure_cooloff),
            shut_down: AtomicBool::new(false),
            sink_unavailable: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle { flusher: None }),
            connector,
            config,
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        lock(&self.lifecycle).flusher.is_some()
    }

    ///////////////////////////////////////////////////////////////////////////////////////////////
    //
    // Producer side.

    // Write a record that has already been built.
    pub fn write(&self, record: R) -> bool {
        self.write_deferred(Deferred::ready(record))
    }

    // Write a record that will be built on the flusher thread when its batch is sent.
    pub fn write_deferred(&self, record: Deferred<R>) -> bool {
        if !self.config.enabled || self.sink_unavailable.load(Ordering::Acquire) {
            return false;
        }
        self.assert_not_shut_down();

        let counters = &self.shared.counters;
        if self.cooloff.is_active(Instant::now()) {
            counters.inc_enqueue_cooloff();
            log::trace!("{}: Cooling off from enqueue failure", self.config.name);
            return false;
        }

        let deadline = self.config.enqueue_timeout.map(|t| Instant::now() + t);
        let give_up = || self.shut_down.load(Ordering::Acquire);
        match self
            .shared
            .queue
            .offer_until(record, deadline, BLOCKED_WRITE_RECHECK, &give_up)
        {
            Offer::Accepted => {
                // Stopped while we were waiting for space, and stop() made room.
                self.assert_not_shut_down();
                counters.inc_enqueued();
                self.cooloff.clear();
                return true;
            }
            Offer::TimedOut(_) => {
                // Stopped while we were waiting for space.
                self.assert_not_shut_down();
                counters.inc_enqueue_timeout();
            }
        }

        if self.cooloff.trip(Instant::now()) {
            log::warn!(
                "{}: Could not enqueue record, cooling off for {:?}",
                self.config.name,
                self.cooloff.duration()
            );
        }
        false
    }

    fn assert_not_shut_down(&self) {
        assert!(
            !self.shut_down.load(Ordering::Acquire),
            "{}: Attempt to enqueue while the writer is shut down!",
            self.config.name
        );
    }

    ///////////////////////////////////////////////////////////////////////////////////////////////
    //
    // Flushing.

    // Run one drain-and-flush cycle against the current sink, returning the number of records
    // drained.  Without a sink (not started, or shutting down) nothing is drained.
    pub fn run_cycle(&self) -> usize {
        let slot = lock(&self.lifecycle).flusher.as_ref().map(|f| f.sink.clone());
        match slot {
            Some(slot) => flush_cycle(&self.shared, &slot),
            None => {
                log::debug!("{}: Not running, nothing to flush into", self.config.name);
                0
            }
        }
    }

    // Run one drain-and-flush cycle against the given sink.
    pub fn drain_into(&self, sink: &mut dyn DataSink<R>) -> usize {
        drain_and_flush(&self.shared, sink)
    }

    ///////////////////////////////////////////////////////////////////////////////////////////////
    //
    // Lifecycle.

    pub fn start(&self) {
        if !self.config.enabled {
            log::debug!("{}: Writer disabled, not starting", self.config.name);
            return;
        }
        let mut lifecycle = lock(&self.lifecycle);
        assert!(
            lifecycle.flusher.is_none(),
            "{}: Already started, boldly refusing to start twice!",
            self.config.name
        );

        log::info!(
            "{}: Starting writer for {}",
            self.config.name,
            self.config.target
        );
        let sink = match self.connector.connect() {
            Ok(sink) => sink,
            Err(e) => {
                log::error!(
                    "{}: Could not open sink for {}: {e}",
                    self.config.name,
                    self.config.target
                );
                self.sink_unavailable.store(true, Ordering::Release);
                return;
            }
        };
        let slot: SinkSlot<R> = Arc::new(Mutex::new(Some(sink)));

        let (stop_sender, stop_receiver) = channel::bounded::<()>(0);
        let (done_sender, done_receiver) = channel::bounded::<()>(0);
        let shared = self.shared.clone();
        let sink = slot.clone();
        let ticker = self.config.ticker_interval;
        let spawned = thread::Builder::new()
            .name(format!("burstwriter-{}", self.config.target))
            .spawn(move || {
                flusher_loop(&shared, &sink, ticker, stop_receiver);
                // The flusher may outlive stop()'s grace period, in which case the sink is ours
                // to close.
                close_sink(&shared.name, &sink);
                drop(done_sender);
            });
        match spawned {
            Ok(handle) => {
                lifecycle.flusher = Some(Flusher {
                    handle,
                    sink: slot,
                    stop: stop_sender,
                    done: done_receiver,
                });
                self.sink_unavailable.store(false, Ordering::Release);
                self.shut_down.store(false, Ordering::Release);
            }
            Err(e) => {
                log::error!("{}: Could not start flusher thread: {e}", self.config.name);
                close_sink(&self.config.name, &slot);
                self.sink_unavailable.store(true, Ordering::Release);
            }
        }
    }

    pub fn stop(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        let Some(flusher) = lifecycle.flusher.take() else {
            log::debug!("{}: Never started, ignoring stop()", self.config.name);
            return;
        };
        log::info!(
            "{}: Stopping writer for {}",
            self.config.name,
            self.config.target
        );
        self.shut_down.store(true, Ordering::Release);

        drop(flusher.stop);
        match flusher.done.recv_timeout(STOP_GRACE) {
            Err(channel::RecvTimeoutError::Disconnected) => {
                // The flusher has closed the sink on its way out.
                let _ = flusher.handle.join();
            }
            Ok(()) | Err(channel::RecvTimeoutError::Timeout) => {
                // Most likely stuck in the sink.  If it is, it holds the sink and will close it
                // when the flush returns.
                log::warn!(
                    "{}: Flusher did not exit within {:?}, abandoning it",
                    self.config.name,
                    STOP_GRACE
                );
                try_close_sink(&self.config.name, &flusher.sink);
            }
        }

        let mut discarded = vec![];
        let n = self.shared.queue.drain_to(&mut discarded);
        if n > 0 {
            self.shared.counters.add_lost(n);
            log::warn!(
                "{}: Discarded {n} unsent records on shutdown",
                self.config.name
            );
        }
    }

    ///////////////////////////////////////////////////////////////////////////////////////////////
    //
    // Counters.  These can be read at any time from any thread.

    pub fn ops_enqueued(&self) -> u64 {
        self.shared.counters.enqueued()
    }

    pub fn ops_enqueue_timeout(&self) -> u64 {
        self.shared.counters.enqueue_timeout()
    }

    pub fn ops_enqueue_cooloff(&self) -> u64 {
        self.shared.counters.enqueue_cooloff()
    }

    pub fn ops_dequeued(&self) -> u64 {
        self.shared.counters.dequeued()
    }

    pub fn ops_sent(&self) -> u64 {
        self.shared.counters.sent()
    }

    pub fn ops_lost(&self) -> u64 {
        self.shared.counters.lost()
    }

    pub fn queue_length(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn longest_burst(&self) -> u64 {
        self.shared.counters.longest_burst()
    }

    pub fn stats(&self) -> Stats {
        self.shared.counters.snapshot(self.shared.queue.len())
    }

    // Exposed for tests that need to look at the damping window directly.
    #[cfg(test)]
    pub(crate) fn cooloff_deadline(&self) -> Option<Instant> {
        self.cooloff.deadline()
    }
}

impl<R> Drop for Writer<R> {
    fn drop(&mut self) {
        // Don't leave a flusher running against a sink nobody can close.
        let flusher = match self.lifecycle.get_mut() {
            Ok(l) => l.flusher.take(),
            Err(poisoned) => poisoned.into_inner().flusher.take(),
        };
        if let Some(flusher) = flusher {
            drop(flusher.stop);
            let _ = flusher.done.recv_timeout(STOP_GRACE);
            try_close_sink(&self.config.name, &flusher.sink);
        }
    }
}

// A poisoned lock means some thread panicked while holding it.  Neither the lifecycle state nor the
// sink slot can be left half-updated by a panic, so just carry on.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn close_sink<R>(name: &str, slot: &SinkSlot<R>) {
    if let Some(mut sink) = lock(slot).take() {
        log::debug!("{name}: Closing sink {}", sink.name());
        sink.close();
    }
}

// Close the sink unless somebody is using it.
fn try_close_sink<R>(name: &str, slot: &SinkSlot<R>) {
    let taken = match slot.try_lock() {
        Ok(mut guard) => guard.take(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
        Err(TryLockError::WouldBlock) => None,
    };
    if let Some(mut sink) = taken {
        log::debug!("{name}: Closing sink {}", sink.name());
        sink.close();
    }
}

fn flusher_loop<R: Send + 'static>(
    shared: &Shared<R>,
    sink: &SinkSlot<R>,
    ticker: Duration,
    stop: channel::Receiver<()>,
) {
    log::info!("{}: Flusher starting (ticker: {ticker:?})", shared.name);
    loop {
        // Stop has priority over a pending cycle.
        if !matches!(stop.try_recv(), Err(channel::TryRecvError::Empty)) {
            break;
        }
        flush_cycle(shared, sink);
        match stop.recv_timeout(ticker) {
            Err(channel::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    log::info!("{}: Flusher exiting", shared.name);
}

fn flush_cycle<R: Send + 'static>(shared: &Shared<R>, sink: &SinkSlot<R>) -> usize {
    let mut slot = lock(sink);
    match slot.as_mut() {
        Some(sink) => drain_and_flush(shared, sink.as_mut()),
        None => {
            log::warn!("{}: No sink, probably shutting down!", shared.name);
            0
        }
    }
}

fn drain_and_flush<R>(shared: &Shared<R>, sink: &mut dyn DataSink<R>) -> usize {
    let Some(first) = shared.queue.poll() else {
        return 0;
    };
    let mut batch = vec![first];
    shared.queue.drain_to(&mut batch);
    let size = batch.len();

    let counters = &shared.counters;
    counters.add_dequeued(size);
    if counters.record_burst(size) {
        log::debug!("{}: New longest burst {size}", shared.name);
    }

    log::trace!("{}: Starting write of {size} elements...", shared.name);
    let mut records = Vec::with_capacity(size);
    let mut bad = 0;
    for d in batch {
        match d.evaluate() {
            Ok(r) => records.push(r),
            Err(e) => {
                bad += 1;
                log::warn!("{}: Dropping record: {e}", shared.name);
            }
        }
    }
    if bad > 0 {
        counters.add_lost(bad);
    }

    let n = records.len();
    if n == 0 {
        return size;
    }
    match sink.flush(records) {
        Ok(()) => {
            counters.add_sent(n);
            log::trace!("{}: Wrote {n} records to {}", shared.name, sink.name());
        }
        Err(e) => {
            counters.add_lost(n);
            log::warn!(
                "{}: Sink {} failed, {n} records lost: {e}",
                shared.name,
                sink.name()
            );
        }
    }
    size
}
