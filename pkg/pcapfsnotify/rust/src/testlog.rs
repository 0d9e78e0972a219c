// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Captures the JSON log lines of unit tests.
//!
//! The `log` backend is process-wide and tests run in parallel, so records are
//! looked up by a field unique to the test, usually its temp file paths.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};

use dd_agent_log::MESSAGE_KEY;
use log::LevelFilter;
use serde_json::Value;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

static CAPTURED: OnceLock<SharedBuf> = OnceLock::new();

/// Installs the capturing logger. Safe to call from every test.
pub fn capture() {
    CAPTURED.get_or_init(|| {
        let buf = SharedBuf::default();
        dd_agent_log::Builder::new()
            .level(LevelFilter::Debug)
            .writer(Box::new(buf.clone()))
            .init()
            .unwrap();
        buf
    });
}

/// Captured lines whose `field` equals `value`.
pub fn records(field: &str, value: &str) -> Vec<Value> {
    let Some(buf) = CAPTURED.get() else {
        return Vec::new();
    };
    let bytes = buf.0.lock().unwrap().clone();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .filter(|line| line[field] == value)
        .collect()
}

/// Number of `records` whose message starts with `prefix`.
pub fn count(field: &str, value: &str, prefix: &str) -> usize {
    records(field, value)
        .iter()
        .filter(|line| line[MESSAGE_KEY].as_str().is_some_and(|msg| msg.starts_with(prefix)))
        .count()
}
