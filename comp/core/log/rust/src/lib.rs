// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Structured `log` backend shared by the workspace binaries.
//!
//! Every record becomes a single JSON object on its own line:
//!
//! ```text
//! {"event":"PCAP_EXPORT","logger":"dd_pcap_fsnotify::mover","message":"...","severity":"INFO","time":"..."}
//! ```
//!
//! Key-value pairs attached with the `log` macros (`info!(event = "X"; "...")`)
//! are flattened into the object next to the fixed keys, and static fields
//! configured on the [`Builder`] are stamped on every line.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use log::kv::{self, Key, VisitSource};
use log::{LevelFilter, Log, Metadata, Record};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const SEVERITY_KEY: &str = "severity";
pub const MESSAGE_KEY: &str = "message";
pub const TIME_KEY: &str = "time";
pub const LOGGER_KEY: &str = "logger";

/// Reads a level from the environment (`error`, `warn`, `info`, `debug`,
/// `trace`, `off`), falling back to `default` when unset or unparsable.
pub fn level_from_env(var: &str, default: LevelFilter) -> LevelFilter {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug)]
pub enum InitError {
    Io(io::Error),
    AlreadySet(log::SetLoggerError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Io(e) => write!(f, "failed to open log sink: {e}"),
            InitError::AlreadySet(e) => write!(f, "logger already initialized: {e}"),
        }
    }
}

impl std::error::Error for InitError {}

enum Sink {
    Stdout,
    File(PathBuf),
    Writer(Box<dyn Write + Send>),
}

pub struct Builder {
    level: LevelFilter,
    fields: Map<String, Value>,
    sink: Sink,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            level: LevelFilter::Info,
            fields: Map::new(),
            sink: Sink::Stdout,
        }
    }

    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Adds a field written on every line. Fields set by a record with the
    /// same key take precedence.
    pub fn static_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Appends to `path` instead of writing to stdout.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Sink::File(path.into());
        self
    }

    pub fn writer(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.sink = Sink::Writer(writer);
        self
    }

    pub fn build(self) -> io::Result<JsonLogger> {
        let out: Box<dyn Write + Send> = match self.sink {
            Sink::Stdout => Box::new(io::stdout()),
            Sink::File(path) => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
            Sink::Writer(writer) => writer,
        };
        Ok(JsonLogger {
            level: self.level,
            fields: self.fields,
            out: Mutex::new(out),
        })
    }

    /// Installs the logger as the global `log` backend.
    pub fn init(self) -> Result<(), InitError> {
        let logger = self.build().map_err(InitError::Io)?;
        let level = logger.level;
        log::set_boxed_logger(Box::new(logger)).map_err(InitError::AlreadySet)?;
        log::set_max_level(level);
        Ok(())
    }
}

pub struct JsonLogger {
    level: LevelFilter,
    fields: Map<String, Value>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLogger {
    /// Renders `record` as a single JSON line, without the trailing newline.
    pub fn format(&self, record: &Record<'_>) -> String {
        let mut object = self.fields.clone();

        let mut collector = FieldCollector(&mut object);
        // A failing visit only loses structured fields; the message is kept.
        let _ = record.key_values().visit(&mut collector);

        object.insert(
            SEVERITY_KEY.to_string(),
            Value::from(record.level().as_str()),
        );
        object.insert(MESSAGE_KEY.to_string(), Value::from(record.args().to_string()));
        object.insert(LOGGER_KEY.to_string(), Value::from(record.target()));
        object.insert(TIME_KEY.to_string(), Value::from(now_rfc3339()));

        Value::Object(object).to_string()
    }
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.format(record);
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    }

    fn flush(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

struct FieldCollector<'a>(&'a mut Map<String, Value>);

impl<'kvs> VisitSource<'kvs> for FieldCollector<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        self.0.insert(key.as_str().to_string(), to_json(&value));
        Ok(())
    }
}

fn to_json(value: &kv::Value<'_>) -> Value {
    if let Some(s) = value.to_borrowed_str() {
        return Value::from(s);
    }
    if let Some(n) = value.to_u64() {
        return Value::from(n);
    }
    if let Some(n) = value.to_i64() {
        return Value::from(n);
    }
    if let Some(b) = value.to_bool() {
        return Value::from(b);
    }
    Value::from(value.to_string())
}
