// A Deferred record is a computation that produces one record when it is evaluated.  The writer
// evaluates it on the flusher thread at the time the batch is sent, so whatever it costs to build
// the record is paid there and not by the producer that called write().
//
// Evaluation failure is a per-record affair: the flusher drops the record, counts it as lost, and
// sends the rest of the batch.  A computation that panics is treated the same way as one that
// returns an error, the flusher thread must survive bad producers.

use std::panic::{self, AssertUnwindSafe};

pub struct Deferred<R> {
    thunk: Box<dyn FnOnce() -> Result<R, String> + Send>,
}

impl<R> Deferred<R> {
    pub fn new<F>(f: F) -> Deferred<R>
    where
        F: FnOnce() -> Result<R, String> + Send + 'static,
    {
        Deferred { thunk: Box::new(f) }
    }

    pub fn evaluate(self) -> Result<R, String> {
        match panic::catch_unwind(AssertUnwindSafe(self.thunk)) {
            Ok(result) => result,
            Err(payload) => {
                let why = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                Err(format!("Record computation panicked: {why}"))
            }
        }
    }
}

impl<R: Send + 'static> Deferred<R> {
    // A record that has already been built.
    pub fn ready(record: R) -> Deferred<R> {
        Deferred::new(move || Ok(record))
    }
}

#[test]
pub fn test_deferred_evaluates_lazily() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let ran = Arc::new(AtomicBool::new(false));
    let r = ran.clone();
    let d = Deferred::new(move || {
        r.store(true, Ordering::SeqCst);
        Ok(17u32)
    });
    assert!(!ran.load(Ordering::SeqCst));
    assert!(d.evaluate() == Ok(17));
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
pub fn test_deferred_failures() {
    assert!(Deferred::ready("x".to_string()).evaluate() == Ok("x".to_string()));
    let d: Deferred<u32> = Deferred::new(|| Err("no good".to_string()));
    assert!(d.evaluate() == Err("no good".to_string()));
    let d: Deferred<u32> = Deferred::new(|| panic!("boom"));
    let e = d.evaluate().unwrap_err();
    assert!(e.contains("boom"));
}
