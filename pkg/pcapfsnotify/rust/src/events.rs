// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Event vocabulary attached to every structured log line as the `event` field.

use std::fmt;
use std::path::Path;

use log::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PcapEvent {
    /// Watcher initialization.
    Init,
    /// Terminal flush progress.
    End,
    /// Watcher, flush, and tracker errors (including leaked segments).
    Error,
    /// A new segment was detected.
    Create,
    /// Export attempts and outcomes.
    Export,
    /// A segment became the next one to export for its key.
    Queued,
    /// OS write buffers flushed.
    MemoryFlush,
    /// Termination signal or sentinel received.
    Signal,
    /// Waiting on / acquiring the companion lock file.
    Lock,
}

impl PcapEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            PcapEvent::Init => "PCAP_FSNINI",
            PcapEvent::End => "PCAP_FSNEND",
            PcapEvent::Error => "PCAP_FSNERR",
            PcapEvent::Create => "PCAP_CREATE",
            PcapEvent::Export => "PCAP_EXPORT",
            PcapEvent::Queued => "PCAP_QUEUED",
            PcapEvent::MemoryFlush => "PCAP_OSWMEM",
            PcapEvent::Signal => "PCAP_SIGNAL",
            PcapEvent::Lock => "PCAP_FSLOCK",
        }
    }
}

impl fmt::Display for PcapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logs a filesystem event with its `source`, `target`, and `bytes` fields.
pub(crate) fn fs_event(
    level: Level,
    event: PcapEvent,
    source: &Path,
    target: &Path,
    bytes: u64,
    error: Option<&dyn fmt::Display>,
    message: fmt::Arguments<'_>,
) {
    match error {
        Some(error) => log::log!(
            level,
            event = event.as_str(),
            source:% = source.display(),
            target:% = target.display(),
            bytes = bytes,
            error:% = error;
            "{message}"
        ),
        None => log::log!(
            level,
            event = event.as_str(),
            source:% = source.display(),
            target:% = target.display(),
            bytes = bytes;
            "{message}"
        ),
    }
}
