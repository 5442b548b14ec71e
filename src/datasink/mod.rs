pub mod directory;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod stdio;

// The DataSink hides the specific store we write to.  The writer hands it one batch per flush cycle
// from the flusher thread, and nobody else ever calls it.  The sink must not retry on its own: a
// failed batch is reported back as Err with an explanatory message and the writer decides what to
// do (currently: count it as lost and move on).

pub trait DataSink<R>: Send {
    // Used in log messages.
    fn name(&self) -> String;

    // Store the batch, all or nothing as far as the caller is concerned.
    fn flush(&mut self, batch: Vec<R>) -> Result<(), String>;

    // Release connections, file handles, and so on.  The sink is dropped right after this, and
    // flush() is never called after it.
    fn close(&mut self) {}
}

// A SinkConnector opens a fresh sink every time the writer starts.  Failing to connect is an
// ordinary runtime error (unreachable host and so on), not a reason to take the process down.

pub trait SinkConnector<R>: Send + Sync {
    fn connect(&self) -> Result<Box<dyn DataSink<R>>, String>;
}

impl<R, F> SinkConnector<R> for F
where
    F: Fn() -> Result<Box<dyn DataSink<R>>, String> + Send + Sync,
{
    fn connect(&self) -> Result<Box<dyn DataSink<R>>, String> {
        self()
    }
}
