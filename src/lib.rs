// A write-behind buffered writer: producers hand records to a bounded queue and carry on, and a
// background flusher drains the queue into a data sink in batches.  See writer.rs.

pub mod config;
pub mod cooloff;
pub mod counters;
pub mod daemon;
pub mod datasink;
pub mod deferred;
pub mod document;
pub mod queue;
pub mod time;
pub mod util;
pub mod writer;

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod writer_test;

pub use config::WriterConfig;
pub use counters::Stats;
pub use datasink::{DataSink, SinkConnector};
pub use deferred::Deferred;
pub use document::Document;
pub use writer::Writer;
