// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{Level, log};
use tokio_util::sync::CancellationToken;

use crate::events::PcapEvent;
use crate::mover::{MoveError, MoveOptions, MoveReport, Mover};
use crate::segment::RotationKey;
use crate::shutdown::Lifecycle;

/// One unit of export work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTask {
    /// A segment superseded by the next one of its rotation key.
    Streaming {
        source: PathBuf,
        key: RotationKey,
        iteration: u64,
    },
    /// A file left in the source directory at shutdown. Rotation bookkeeping
    /// is bypassed, compression and deletion are disabled.
    TerminalFlush { source: PathBuf, key: RotationKey },
}

impl ExportTask {
    pub fn source(&self) -> &Path {
        match self {
            ExportTask::Streaming { source, .. } | ExportTask::TerminalFlush { source, .. } => source,
        }
    }

    pub fn key(&self) -> &RotationKey {
        match self {
            ExportTask::Streaming { key, .. } | ExportTask::TerminalFlush { key, .. } => key,
        }
    }

    pub fn is_terminal_flush(&self) -> bool {
        matches!(self, ExportTask::TerminalFlush { .. })
    }
}

/// Runs export tasks through the mover.
pub struct Exporter {
    mover: Mover,
    streaming: MoveOptions,
    lifecycle: Arc<Lifecycle>,
}

impl Exporter {
    pub fn new(mover: Mover, streaming: MoveOptions, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            mover,
            streaming,
            lifecycle,
        }
    }

    pub fn mover(&self) -> &Mover {
        &self.mover
    }

    pub fn options_for(&self, task: &ExportTask) -> MoveOptions {
        match task {
            ExportTask::Streaming { .. } => self.streaming,
            ExportTask::TerminalFlush { .. } => MoveOptions {
                compress: false,
                delete_on_success: false,
            },
        }
    }

    pub async fn run(
        &self,
        task: &ExportTask,
        cancel: &CancellationToken,
    ) -> Result<MoveReport, MoveError> {
        let source = task.source();
        let key = task.key();
        let (action, verb, done) = if task.is_terminal_flush() {
            if self.lifecycle.is_active() {
                log!(
                    Level::Error,
                    event = PcapEvent::Error.as_str(),
                    source:% = source.display(),
                    key:% = key;
                    "refusing to flush while the watcher is active: {}",
                    source.display()
                );
                return Err(MoveError::Refused {
                    path: source.to_path_buf(),
                });
            }
            ("flush", "flushing", "flushed")
        } else {
            ("export", "exporting", "exported")
        };

        let event = if task.is_terminal_flush() {
            PcapEvent::End
        } else {
            PcapEvent::Export
        };
        let iteration = match task {
            ExportTask::Streaming { iteration, .. } => *iteration,
            ExportTask::TerminalFlush { .. } => 0,
        };

        log!(
            Level::Info,
            event = event.as_str(),
            source:% = source.display(),
            key:% = key,
            ext = key.ext.as_str(),
            iface:% = key.iface(),
            iteration = iteration;
            "{verb} PCAP file: {}",
            source.display()
        );

        let result = self
            .mover
            .move_file(source, self.options_for(task), cancel)
            .await;

        match &result {
            Ok(report) => log!(
                Level::Info,
                event = event.as_str(),
                source:% = source.display(),
                target:% = report.target.display(),
                bytes = report.bytes,
                key:% = key,
                ext = key.ext.as_str(),
                iface:% = key.iface(),
                iteration = iteration;
                "{done} PCAP file: {}",
                report.target.display()
            ),
            Err(e) => log!(
                Level::Error,
                event = event.as_str(),
                source:% = source.display(),
                key:% = key,
                ext = key.ext.as_str(),
                iface:% = key.iface(),
                iteration = iteration,
                error:% = e;
                "failed to {action} PCAP file: {}",
                source.display()
            ),
        }
        result
    }
}
