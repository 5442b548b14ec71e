// Config file parsing and writer resolution, against the files in testdata/.

use crate::config::{parse_config, parse_config_str, WriterConfig};

use std::time::Duration;

#[test]
pub fn test_parse_config_file() {
    let ini = parse_config("src/testdata/burstwriter-config.txt").unwrap();
    assert!(ini.writer_names() == vec!["events".to_string(), "audit".to_string()]);
    assert!(ini.directory.data_dir == Some("/var/lib/burstwriter".to_string()));
    assert!(ini.debug.verbose);
    assert!(ini.debug.time_limit == Some(Duration::from_secs(600)));

    // Own section wins over the shared one, which wins over the default.
    let events = ini.writer_config("events").unwrap();
    assert!(
        events
            == WriterConfig::new("events")
                .with_enabled(true)
                .with_queue_length(20000)
                .with_ticker_interval(Duration::from_millis(250))
                .with_enqueue_timeout(Some(Duration::from_millis(50)))
                .with_failure_cooloff(Duration::from_secs(5))
                .with_target("event-log")
    );

    // `none` overrides a shared timeout, and the target defaults to the writer name.
    let audit = ini.writer_config("audit").unwrap();
    assert!(!audit.enabled);
    assert!(audit.enqueue_timeout.is_none());
    assert!(audit.queue_length == 500);
    assert!(audit.failure_cooloff == Duration::from_secs(1));
    assert!(audit.target == "audit");

    // The shared section alone describes "default", but other names need a section.
    let default = ini.writer_config("default").unwrap();
    assert!(default.queue_length == 500);
    assert!(default.target == "default");
    assert!(ini.writer_config("nonesuch").is_err());
}

#[test]
pub fn test_parse_config_errors() {
    assert!(parse_config("src/testdata/no-such-file.txt").is_err());
    assert!(parse_config("src/testdata/burstwriter-two-sinks.txt").is_err());

    assert!(parse_config_str("enabled = true\n").is_err());
    assert!(parse_config_str("[writers]\n").is_err());
    assert!(parse_config_str("[writer]\nqueue-size = 10\n").is_err());
    assert!(parse_config_str("[writer]\nqueue-length = 0\n").is_err());
    assert!(parse_config_str("[writer]\nqueue-length = many\n").is_err());
    assert!(parse_config_str("[writer]\nticker-time = 100\n").is_err());
    assert!(parse_config_str("[writer]\nenabled = yes\n").is_err());
    assert!(parse_config_str("[writer.a]\n[writer.a]\n").is_err());
    assert!(parse_config_str("[writer.a b]\n").is_err());
    assert!(parse_config_str("[writer.]\n").is_err());
    assert!(parse_config_str("[directory]\n").is_err());
    assert!(parse_config_str("[debug]\ntime-limit = forever\n").is_err());
}

#[test]
pub fn test_parse_config_comments_and_quotes() {
    let ini = parse_config_str(
        "# nothing here\n\n  [writer.x]  \n\ttarget = 'a b'\n# enabled = true\nenqueue-timeout = `2s`\n",
    )
    .unwrap();
    let x = ini.writer_config("x").unwrap();
    assert!(x.target == "a b");
    assert!(!x.enabled);
    assert!(x.enqueue_timeout == Some(Duration::from_secs(2)));
}

#[cfg(feature = "kafka")]
#[test]
pub fn test_parse_kafka_config() {
    let ini = parse_config_str("[kafka]\nbroker-address = localhost:9092\ntimeout = 5s\n").unwrap();
    assert!(ini.kafka.broker_address == "localhost:9092");
    assert!(ini.kafka.timeout == Duration::from_secs(5));
    assert!(ini.kafka.ca_file.is_none());
    assert!(parse_config_str("[kafka]\ntimeout = 5s\n").is_err());
    assert!(parse_config_str("[kafka]\nbroker-address = x:1\n[directory]\ndata-directory = /tmp\n").is_err());
}
