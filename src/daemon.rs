#![allow(clippy::comparison_to_empty)]
#![allow(clippy::len_zero)]

// The daemon drives one writer from the lines of stdin: every line becomes a document
//
//   {"seq":<n>,"time":"<iso time of reading>","line":"<text>"}
//
// that is handed to the writer, which in turn hands it to whatever sink the config file names
// (stdio if none).  It runs until end of input, a signal, or the debug time limit, then stops the
// writer and reports the writer's counters on stderr.
//
// THREADS AND I/O
//
// The main thread of the daemon listens on a channel from which it reads events: input lines (from
// the reader thread), end of input, and signals (keyboard interrupts).  The channel is bounded so
// that a writer that pushes back on the main thread also, eventually, pushes back on the reader.
//
// Signal handlers place signals in the daemon's channel as events.

use crate::config::{self, Ini, WriterConfig};
use crate::counters::Stats;
use crate::datasink::directory::DirectorySink;
#[cfg(feature = "kafka")]
use crate::datasink::kafka::KafkaSink;
use crate::datasink::stdio::StdioSink;
use crate::datasink::{DataSink, SinkConnector};
use crate::deferred::Deferred;
use crate::document::Document;
use crate::time;
use crate::writer::Writer;

use std::io::BufRead;
use std::thread;

use crossbeam::{channel, select};
use signal_hook::consts::signal;
use signal_hook::iterator::Signals;

// Room for this many unprocessed events between the reader thread and the main thread.
const EVENT_BACKLOG: usize = 64;

#[derive(Clone, Debug)]
pub enum Operation {
    // An input line and the time it was read
    Line(String, String),
    EndOfInput,
    // Signals: signal code
    Signal(i32),
    // Unrecoverable errors on other threads: explanatory message
    Fatal(String),
}

// The daemon_mode() returns an error only if it fails to parse the ini file, fails to set up the
// signal handlers, or the input could not be read.  In all other cases it stops the writer, which
// discards (and counts) whatever could not be sent, and returns normally.
//
// Note that installing the logger is delegated to the daemon mode (in order to get the log level
// from the config file) and the daemon mode is required to install the logger before returning,
// even if there are errors in parsing the config file.  Higher levels will depend on the logger
// having been installed in order to signal any errors the daemon mode returns.

pub fn daemon_mode(config_file: &str, writer_name: Option<&str>) -> Result<(), String> {
    let ini = match config::parse_config(config_file) {
        Ok(ini) => {
            init_logger(if ini.debug.verbose {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Warn
            });
            ini
        }
        Err(e) => {
            init_logger(log::LevelFilter::Warn);
            return Err(e);
        }
    };

    let cfg = resolve_writer(&ini, writer_name)?;
    if !cfg.enabled {
        log::warn!("Writer {} is not enabled, input will be ignored", cfg.name);
    }
    let connector = make_connector(&ini, &cfg);
    let writer = Writer::new(cfg, connector);

    // For communicating with the main thread.  event_sender is used to send input lines (from the
    // reader thread) and signals (from the signal handling thread); event_receiver receives those
    // events in the main thread.
    let (event_sender, event_receiver) = channel::bounded(EVENT_BACKLOG);

    let signal_handlers = {
        let mut signals = Signals::new([signal::SIGINT, signal::SIGTERM, signal::SIGHUP])
            .map_err(|_| "Signal handling setup".to_string())?;
        let signal_handlers = signals.handle();
        let sender = event_sender.clone();
        thread::spawn(move || {
            for signal in signals.forever() {
                let _ = sender.send(Operation::Signal(signal));
            }
        });
        signal_handlers
    };

    {
        let sender = event_sender.clone();
        thread::spawn(move || read_input(std::io::stdin().lock(), sender));
    }

    writer.start();
    log::debug!("Initialization succeeded");

    let cutoff = if let Some(limit) = ini.debug.time_limit {
        channel::after(limit)
    } else {
        channel::never()
    };
    let mut seq = 0u64;
    let mut fatal_msg = "".to_string();
    'messageloop: loop {
        select! {
            recv(cutoff) -> _ => {
                log::debug!("Time limit reached");
                break 'messageloop;
            }
            recv(event_receiver) -> msg => match msg {
                Err(_) => {
                    // We hold a sender ourselves, so the channel can't be closed
                    panic!("Event queue receive");
                }
                Ok(Operation::Line(line, timestamp)) => {
                    seq += 1;
                    writer.write_deferred(line_document(seq, timestamp, line));
                }
                Ok(Operation::EndOfInput) => {
                    log::debug!("End of input");
                    break 'messageloop;
                }
                Ok(Operation::Signal(s)) => {
                    log::debug!("Received signal {s}");
                    break 'messageloop;
                }
                Ok(Operation::Fatal(msg)) => {
                    log::debug!("Fatal error: {msg}");
                    fatal_msg = msg;
                    break 'messageloop;
                }
            }
        }
    }

    writer.stop();
    eprintln!("{}", format_stats(&writer.config().name, &writer.stats()));

    // The reader thread may be blocked in a read and the signal thread in a wait; they die with
    // the process.
    signal_handlers.close();

    if fatal_msg != "" {
        Err(fatal_msg)
    } else {
        Ok(())
    }
}

// Print the resolved writer configuration, one setting per line.

pub fn config_mode(config_file: &str, writer_name: Option<&str>) -> Result<(), String> {
    init_logger(log::LevelFilter::Warn);
    let ini = config::parse_config(config_file)?;
    let cfg = resolve_writer(&ini, writer_name)?;
    print!("{}", format_config(&cfg, &sink_description(&ini)));
    Ok(())
}

fn init_logger(level: log::LevelFilter) {
    // Fails only if a logger is already installed, in which case that one will do.
    let _ = simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init();
}

// The writer to run is the one named on the command line, or the only one in the config file, or
// the "default" writer described by the shared [writer] section if the file names none.
pub fn resolve_writer(ini: &Ini, writer_name: Option<&str>) -> Result<WriterConfig, String> {
    let names = ini.writer_names();
    let name = match writer_name {
        Some(n) => n.to_string(),
        None => match names.len() {
            0 => "default".to_string(),
            1 => names[0].clone(),
            _ => {
                return Err(format!(
                    "Several writers configured ({}), select one with --writer",
                    names.join(", ")
                ))
            }
        },
    };
    ini.writer_config(&name)
}

// The sink is opened anew on every start of the writer, so the connector owns a copy of the sink
// settings.  At most one sink section is allowed by the parser.
pub fn make_connector(ini: &Ini, cfg: &WriterConfig) -> Box<dyn SinkConnector<Document>> {
    let target = cfg.target.clone();

    #[cfg(feature = "kafka")]
    if ini.kafka.broker_address != "" {
        let kafka = ini.kafka.clone();
        let client_id = format!("burstwriter/{}", cfg.name);
        return Box::new(move || -> Result<Box<dyn DataSink<Document>>, String> {
            Ok(Box::new(KafkaSink::open(&kafka, &client_id, &target)?))
        });
    }

    if let Some(ref data_dir) = ini.directory.data_dir {
        let data_dir = data_dir.clone();
        return Box::new(move || -> Result<Box<dyn DataSink<Document>>, String> {
            Ok(Box::new(DirectorySink::open(&data_dir, &target)?))
        });
    }

    Box::new(move || -> Result<Box<dyn DataSink<Document>>, String> {
        Ok(Box::new(StdioSink::new(&target)))
    })
}

fn sink_description(ini: &Ini) -> String {
    #[cfg(feature = "kafka")]
    if ini.kafka.broker_address != "" {
        return format!("kafka {}", ini.kafka.broker_address);
    }
    if let Some(ref data_dir) = ini.directory.data_dir {
        return format!("directory {data_dir}");
    }
    "stdio".to_string()
}

fn read_input(input: impl BufRead, sender: channel::Sender<Operation>) {
    for l in input.lines() {
        let op = match l {
            Ok(l) => Operation::Line(l, time::now_iso8601()),
            Err(e) => Operation::Fatal(format!("Reading input: {e}")),
        };
        let fatal = matches!(op, Operation::Fatal(_));
        if sender.send(op).is_err() || fatal {
            return;
        }
    }
    let _ = sender.send(Operation::EndOfInput);
}

// The document is only assembled by the flusher, when (and if) its batch is sent.
fn line_document(seq: u64, timestamp: String, line: String) -> Deferred<Document> {
    Deferred::new(move || {
        let mut d = Document::new();
        d.push_u("seq", seq);
        d.push_s("time", timestamp);
        d.push_s("line", line);
        Ok(d)
    })
}

fn format_config(cfg: &WriterConfig, sink: &str) -> String {
    let timeout = match cfg.enqueue_timeout {
        Some(t) => format!("{t:?}"),
        None => "none".to_string(),
    };
    format!(
        "writer: {}\ntarget: {}\nsink: {sink}\nenabled: {}\nqueue-length: {}\nticker-time: {:?}\nenqueue-timeout: {timeout}\nfailure-cooloff-time: {:?}\n",
        cfg.name,
        cfg.target,
        cfg.enabled,
        cfg.queue_length,
        cfg.ticker_interval,
        cfg.failure_cooloff
    )
}

fn format_stats(name: &str, s: &Stats) -> String {
    format!(
        "{name}: enqueued={} enqueue-timeout={} enqueue-cooloff={} dequeued={} sent={} lost={} queued={} longest-burst={}",
        s.enqueued,
        s.enqueue_timeout,
        s.enqueue_cooloff,
        s.dequeued,
        s.sent,
        s.lost,
        s.queue_length,
        s.longest_burst
    )
}

#[test]
pub fn test_read_input() {
    let (sender, receiver) = channel::bounded(10);
    read_input("first\nsecond\n".as_bytes(), sender);
    let ops = receiver.try_iter().collect::<Vec<Operation>>();
    assert!(ops.len() == 3);
    assert!(matches!(&ops[0], Operation::Line(l, _) if l == "first"));
    assert!(matches!(&ops[1], Operation::Line(l, _) if l == "second"));
    assert!(matches!(ops[2], Operation::EndOfInput));
}

#[test]
pub fn test_line_document() {
    let d = line_document(7, "2025-02-26T12:16:28+01:00".to_string(), "x \"y\"".to_string())
        .evaluate()
        .unwrap();
    assert!(d.to_json() == r#"{"seq":7,"time":"2025-02-26T12:16:28+01:00","line":"x \"y\""}"#);
}

#[test]
pub fn test_resolve_writer() {
    let ini = config::parse_config_str("[writer]\nenabled = true\n").unwrap();
    let cfg = resolve_writer(&ini, None).unwrap();
    assert!(cfg.name == "default");
    assert!(cfg.enabled);

    let ini = config::parse_config_str("[writer.a]\n[writer.b]\n").unwrap();
    assert!(resolve_writer(&ini, None).is_err());
    assert!(resolve_writer(&ini, Some("b")).unwrap().name == "b");
    assert!(resolve_writer(&ini, Some("c")).is_err());

    let ini = config::parse_config_str("[writer.only]\ntarget = things\n").unwrap();
    let cfg = resolve_writer(&ini, None).unwrap();
    assert!(cfg.name == "only");
    assert!(cfg.target == "things");
}

#[test]
pub fn test_make_connector() {
    let ini = config::parse_config_str("[directory]\ndata-directory = /dev/null/nowhere\n").unwrap();
    let cfg = resolve_writer(&ini, None).unwrap();
    assert!(sink_description(&ini) == "directory /dev/null/nowhere");
    assert!(make_connector(&ini, &cfg).connect().is_err());

    let ini = config::parse_config_str("[writer]\ntarget = ev\n").unwrap();
    let cfg = resolve_writer(&ini, None).unwrap();
    assert!(sink_description(&ini) == "stdio");
    let sink = make_connector(&ini, &cfg).connect().unwrap();
    assert!(sink.name() == "stdio:ev");
}

#[test]
pub fn test_format_config() {
    let cfg = WriterConfig::new("events")
        .with_enabled(true)
        .with_queue_length(3)
        .with_enqueue_timeout(Some(std::time::Duration::from_millis(10)));
    let s = format_config(&cfg, "stdio");
    assert!(s.contains("writer: events\n"));
    assert!(s.contains("queue-length: 3\n"));
    assert!(s.contains("enqueue-timeout: 10ms\n"));
    assert!(s.contains("failure-cooloff-time: 1s\n"));
}
