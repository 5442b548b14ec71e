// Writer configuration, and yet another config file parser.
//
// A WriterConfig is resolved once, before the writer exists, and is read-only after that.  It can
// be built directly (`WriterConfig::new("events").with_enabled(true)...`) or resolved from a config
// file, where every writer is named and each setting is looked up first in the writer's own section
// `[writer.<name>]`, then in the shared `[writer]` section, and finally falls back to the built-in
// default.
//
// File syntax: `#` starts a comment line, `[section]` opens a section, settings are `name = value`
// where the value may be quoted with ', " or `.  Durations are a positive integer with one of the
// suffixes ms, s, m, h.  Booleans are true or false.

use std::io::BufRead;
use std::time::Duration;

pub const DEFAULT_QUEUE_LENGTH: usize = 1000;
pub const DEFAULT_TICKER_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_FAILURE_COOLOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    // Used for log messages and the flusher thread name.
    pub name: String,
    pub enabled: bool,
    pub queue_length: usize,
    // Both the idle poll interval and the batching window of the flusher.
    pub ticker_interval: Duration,
    // None: wait for queue space as long as it takes.
    pub enqueue_timeout: Option<Duration>,
    pub failure_cooloff: Duration,
    // Identity of the thing written to (collection, topic, subdirectory); opaque to the writer.
    pub target: String,
}

impl Default for WriterConfig {
    fn default() -> WriterConfig {
        WriterConfig {
            name: "default".to_string(),
            enabled: false,
            queue_length: DEFAULT_QUEUE_LENGTH,
            ticker_interval: DEFAULT_TICKER_INTERVAL,
            enqueue_timeout: None,
            failure_cooloff: DEFAULT_FAILURE_COOLOFF,
            target: "default".to_string(),
        }
    }
}

impl WriterConfig {
    pub fn new(name: &str) -> WriterConfig {
        WriterConfig {
            name: name.to_string(),
            target: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_enabled(self, enabled: bool) -> WriterConfig {
        WriterConfig { enabled, ..self }
    }

    pub fn with_queue_length(self, queue_length: usize) -> WriterConfig {
        WriterConfig {
            queue_length,
            ..self
        }
    }

    pub fn with_ticker_interval(self, ticker_interval: Duration) -> WriterConfig {
        WriterConfig {
            ticker_interval,
            ..self
        }
    }

    pub fn with_enqueue_timeout(self, enqueue_timeout: Option<Duration>) -> WriterConfig {
        WriterConfig {
            enqueue_timeout,
            ..self
        }
    }

    pub fn with_failure_cooloff(self, failure_cooloff: Duration) -> WriterConfig {
        WriterConfig {
            failure_cooloff,
            ..self
        }
    }

    pub fn with_target(self, target: &str) -> WriterConfig {
        WriterConfig {
            target: target.to_string(),
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queue_length == 0 {
            return Err(format!("Writer {}: queue-length must be positive", self.name));
        }
        if self.ticker_interval.is_zero() {
            return Err(format!("Writer {}: ticker-time must be positive", self.name));
        }
        if self.target == "" {
            return Err(format!("Writer {}: empty target", self.name));
        }
        Ok(())
    }
}

// Settings as they appear in one [writer] or [writer.<name>] section, None where not given.
#[derive(Clone, Default, Debug)]
pub struct WriterSettings {
    pub enabled: Option<bool>,
    pub queue_length: Option<usize>,
    pub ticker_interval: Option<Duration>,
    // Some(None) is an explicit `enqueue-timeout = none`, which overrides a shared timeout.
    pub enqueue_timeout: Option<Option<Duration>>,
    pub failure_cooloff: Option<Duration>,
    pub target: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DirectoryIni {
    pub data_dir: Option<String>,
}

#[cfg(feature = "kafka")]
#[derive(Clone, Debug)]
pub struct KafkaIni {
    pub broker_address: String,
    pub timeout: Duration,
    pub ca_file: Option<String>,
}

pub struct DebugIni {
    pub verbose: bool,
    pub time_limit: Option<Duration>,
}

pub struct Ini {
    pub shared: WriterSettings,
    // In the order the sections appear in the file.
    pub writers: Vec<(String, WriterSettings)>,
    pub directory: DirectoryIni,
    #[cfg(feature = "kafka")]
    pub kafka: KafkaIni,
    pub debug: DebugIni,
}

impl Ini {
    pub fn writer_names(&self) -> Vec<String> {
        self.writers.iter().map(|(n, _)| n.clone()).collect()
    }

    // Resolve the configuration for the named writer.  The name must have its own section unless
    // it is "default", which is described by the shared section alone.
    pub fn writer_config(&self, name: &str) -> Result<WriterConfig, String> {
        let own = match self.writers.iter().find(|(n, _)| n == name) {
            Some((_, s)) => s.clone(),
            None if name == "default" => WriterSettings::default(),
            None => return Err(format!("No [writer.{name}] section")),
        };
        let shared = &self.shared;
        let mut cfg = WriterConfig::new(name);
        if let Some(x) = own.enabled.or(shared.enabled) {
            cfg.enabled = x;
        }
        if let Some(x) = own.queue_length.or(shared.queue_length) {
            cfg.queue_length = x;
        }
        if let Some(x) = own.ticker_interval.or(shared.ticker_interval) {
            cfg.ticker_interval = x;
        }
        if let Some(x) = own.enqueue_timeout.or(shared.enqueue_timeout) {
            cfg.enqueue_timeout = x;
        }
        if let Some(x) = own.failure_cooloff.or(shared.failure_cooloff) {
            cfg.failure_cooloff = x;
        }
        if let Some(x) = own.target.or(shared.target.clone()) {
            cfg.target = x;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn parse_config(config_file: &str) -> Result<Ini, String> {
    let file = match std::fs::File::open(config_file) {
        Ok(f) => f,
        Err(e) => {
            return Err(format!("{config_file}: {e}"));
        }
    };
    let mut lines = vec![];
    for l in std::io::BufReader::new(file).lines() {
        match l {
            Ok(l) => lines.push(l),
            Err(e) => {
                return Err(format!("{config_file}: {e}"));
            }
        }
    }
    parse_lines(lines.iter().map(|l| l.as_str()))
}

pub fn parse_config_str(text: &str) -> Result<Ini, String> {
    parse_lines(text.lines())
}

fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Ini, String> {
    let mut ini = Ini {
        shared: WriterSettings::default(),
        writers: vec![],
        directory: DirectoryIni { data_dir: None },
        #[cfg(feature = "kafka")]
        kafka: KafkaIni {
            broker_address: "".to_string(),
            timeout: Duration::from_secs(30),
            ca_file: None,
        },
        debug: DebugIni {
            verbose: false,
            time_limit: None,
        },
    };

    enum Section {
        None,
        Shared,
        // Index into ini.writers
        Writer(usize),
        Directory,
        #[cfg(feature = "kafka")]
        Kafka,
        Debug,
    }
    let mut curr_section = Section::None;
    let mut have_directory = false;
    #[cfg(feature = "kafka")]
    let mut have_kafka = false;

    for l in lines {
        if l.starts_with('#') {
            continue;
        }
        let l = l.trim_matches([' ', '\t']);
        if l.len() == 0 {
            continue;
        }
        if l == "[writer]" {
            curr_section = Section::Shared;
            continue;
        }
        if let Some(name) = l.strip_prefix("[writer.").and_then(|s| s.strip_suffix(']')) {
            if name == "" || !name.chars().all(is_name_char) {
                return Err(format!("Invalid writer name in {l}"));
            }
            if ini.writers.iter().any(|(n, _)| n == name) {
                return Err(format!("Duplicate section {l}"));
            }
            ini.writers
                .push((name.to_string(), WriterSettings::default()));
            curr_section = Section::Writer(ini.writers.len() - 1);
            continue;
        }
        if l == "[directory]" {
            if have_directory {
                return Err(format!("Duplicate section {l}"));
            }
            curr_section = Section::Directory;
            have_directory = true;
            continue;
        }
        #[cfg(feature = "kafka")]
        if l == "[kafka]" {
            if have_kafka {
                return Err(format!("Duplicate section {l}"));
            }
            curr_section = Section::Kafka;
            have_kafka = true;
            continue;
        }
        if l == "[debug]" {
            curr_section = Section::Debug;
            continue;
        }
        if l.starts_with("[") {
            return Err(format!("Unknown section {l}"));
        }

        let (name, value) = parse_setting(l)?;
        match curr_section {
            Section::None => return Err("Setting outside section".to_string()),
            Section::Shared => {
                if !parse_writer_setting(&mut ini.shared, "writer", &name, value)? {
                    return Err(format!("Invalid [writer] setting name `{name}`"));
                }
            }
            Section::Writer(ix) => {
                let (ref wname, ref mut settings) = ini.writers[ix];
                let context = format!("writer.{wname}");
                if !parse_writer_setting(settings, &context, &name, value)? {
                    return Err(format!("Invalid [{context}] setting name `{name}`"));
                }
            }
            Section::Directory => match name.as_str() {
                "data-directory" => {
                    if value == "" {
                        return Err("Empty directory.data-directory".to_string());
                    }
                    ini.directory.data_dir = Some(value);
                }
                _ => return Err(format!("Invalid [directory] setting name `{name}`")),
            },
            #[cfg(feature = "kafka")]
            Section::Kafka => match name.as_str() {
                "broker-address" => {
                    ini.kafka.broker_address = value;
                }
                "timeout" => {
                    ini.kafka.timeout = parse_duration("kafka.timeout", &value)?;
                }
                "ca-file" => {
                    ini.kafka.ca_file = Some(value);
                }
                _ => return Err(format!("Invalid [kafka] setting name `{name}`")),
            },
            Section::Debug => match name.as_str() {
                "verbose" => {
                    ini.debug.verbose = parse_bool(&value)?;
                }
                "time-limit" => {
                    ini.debug.time_limit = Some(parse_duration("debug.time-limit", &value)?);
                }
                _ => return Err(format!("Invalid [debug] setting name `{name}`")),
            },
        }
    }

    let mut sinks = 0;
    if have_directory {
        sinks += 1;
        if ini.directory.data_dir.is_none() {
            return Err("Missing directory.data-directory setting".to_string());
        }
    }
    #[cfg(feature = "kafka")]
    if have_kafka {
        sinks += 1;
        if ini.kafka.broker_address == "" {
            return Err("Missing kafka.broker-address setting".to_string());
        }
    }
    if sinks > 1 {
        return Err("More than one data sink configured".to_string());
    }

    Ok(ini)
}

// Returns Ok(false) if `name` is not a writer setting.
fn parse_writer_setting(
    settings: &mut WriterSettings,
    context: &str,
    name: &str,
    value: String,
) -> Result<bool, String> {
    match name {
        "enabled" => {
            settings.enabled = Some(parse_bool(&value)?);
        }
        "queue-length" => {
            let n = value
                .parse::<usize>()
                .map_err(|_| format!("Bad {context}.queue-length"))?;
            if n == 0 {
                return Err(format!("{context}.queue-length must be positive"));
            }
            settings.queue_length = Some(n);
        }
        "ticker-time" => {
            settings.ticker_interval =
                Some(parse_duration(&format!("{context}.ticker-time"), &value)?);
        }
        "enqueue-timeout" => {
            settings.enqueue_timeout = if value == "none" {
                Some(None)
            } else {
                Some(Some(parse_duration(
                    &format!("{context}.enqueue-timeout"),
                    &value,
                )?))
            };
        }
        "failure-cooloff-time" => {
            settings.failure_cooloff = Some(parse_duration(
                &format!("{context}.failure-cooloff-time"),
                &value,
            )?);
        }
        "target" => {
            if value == "" {
                return Err(format!("Empty {context}.target"));
            }
            settings.target = Some(value);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_setting(l: &str) -> Result<(String, String), String> {
    if let Some((name, value)) = l.split_once('=') {
        let name = name.trim_matches([' ', '\t']);
        if name == "" || !name.chars().all(is_name_char) {
            return Err("Illegal character in name".to_string());
        }
        let value = value.trim_matches([' ', '\t']);
        if value == "" {
            return Err("Empty string must be quoted".to_string());
        }
        let value = trim_quotes(value)?;
        Ok((name.to_string(), value.to_string()))
    } else {
        Err("Illegal property definition".to_string())
    }
}

fn parse_bool(l: &str) -> Result<bool, String> {
    match l {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("Invalid boolean value {l}")),
    }
}

pub fn parse_duration(context: &str, l: &str) -> Result<Duration, String> {
    let (digits, unit) = if let Some(ms) = l.strip_suffix("ms") {
        (ms, Duration::from_millis(1))
    } else if let Some(s) = l.strip_suffix(['s', 'S']) {
        (s, Duration::from_secs(1))
    } else if let Some(m) = l.strip_suffix(['m', 'M']) {
        (m, Duration::from_secs(60))
    } else if let Some(h) = l.strip_suffix(['h', 'H']) {
        (h, Duration::from_secs(60 * 60))
    } else {
        return Err(format!("Bad duration in {context}"));
    };
    match digits.parse::<u32>() {
        Ok(k) if k > 0 => Ok(unit * k),
        _ => Err(format!("Bad duration in {context}")),
    }
}

fn trim_quotes(l: &str) -> Result<&str, String> {
    // Invariant: bs.len() > 0
    let bs = l.as_bytes();
    if bs[0] == b'\'' || bs[0] == b'"' || bs[0] == b'`' {
        if bs.len() < 2 || bs[0] != bs[bs.len() - 1] {
            Err("Mismatched quotes".to_string())
        } else {
            Ok(&l[1..l.len() - 1])
        }
    } else {
        Ok(l)
    }
}

#[test]
pub fn test_trim_quotes() {
    assert!(trim_quotes("abc").unwrap() == "abc");
    assert!(trim_quotes("'abc'").unwrap() == "abc");
    assert!(trim_quotes("`abc`").unwrap() == "abc");
    assert!(trim_quotes("abc`").unwrap() == "abc`"); // Only leading quote strips the trailing one
    assert!(trim_quotes("\"abc\"").unwrap() == "abc");
    assert!(trim_quotes("'abc").is_err());
    assert!(trim_quotes("'abc`").is_err());
}

#[test]
pub fn test_parse_duration() {
    assert!(parse_duration("", "10ms").unwrap() == Duration::from_millis(10));
    assert!(parse_duration("", "30s").unwrap() == Duration::from_secs(30));
    assert!(parse_duration("", "10m").unwrap() == Duration::from_secs(600));
    assert!(parse_duration("", "6H").unwrap() == Duration::from_secs(6 * 3600));
    assert!(parse_duration("", "35").is_err());
    assert!(parse_duration("", "0s").is_err());
    assert!(parse_duration("", "12m35s").is_err());
    assert!(parse_duration("", "ms").is_err());
}

#[test]
pub fn test_parse_setting() {
    let (a, b) = parse_setting(" queue-length = 10 ").unwrap();
    assert!(a == "queue-length");
    assert!(b == "10");
    let (a, b) = parse_setting("x_y=`10 + 20`").unwrap();
    assert!(a == "x_y");
    assert!(b == "10 + 20");
    assert!(parse_setting("zappa").is_err());
    assert!(parse_setting("zappa = ").is_err());
    assert!(parse_setting("zappa = `abracadabra").is_err());
    assert!(parse_setting("zapp! = true").is_err());
    assert!(parse_bool("true") == Ok(true));
    assert!(parse_bool("tru").is_err());
}

#[test]
pub fn test_writer_config_defaults() {
    let cfg = WriterConfig::new("events");
    assert!(!cfg.enabled);
    assert!(cfg.queue_length == 1000);
    assert!(cfg.ticker_interval == Duration::from_millis(100));
    assert!(cfg.enqueue_timeout.is_none());
    assert!(cfg.failure_cooloff == Duration::from_secs(1));
    assert!(cfg.target == "events");
    assert!(cfg.validate().is_ok());
    assert!(cfg.clone().with_queue_length(0).validate().is_err());
    assert!(cfg.with_ticker_interval(Duration::ZERO).validate().is_err());
}
