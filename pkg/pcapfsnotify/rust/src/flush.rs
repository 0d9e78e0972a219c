// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Terminal flush: once the watcher is gone, every segment still present in
//! the source directory is exported as is, whatever the rotation tracker
//! thinks of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use walkdir::WalkDir;

use crate::events::PcapEvent;
use crate::export::{ExportTask, Exporter};
use crate::mover::Mover;
use crate::segment::SegmentPattern;

/// Budget of the terminal flush, from the filesystem sync to the last export.
/// The shared cancellation has already fired by the time it runs, so it gets
/// its own.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub submitted: usize,
    pub flushed: usize,
    pub failed: usize,
    /// The budget ran out, or the flush was cancelled, before every submitted
    /// export finished.
    pub timed_out: bool,
    pub latency: Duration,
}

/// Segments under `src_dir` not exported yet, in file name order.
///
/// A segment with either a plain or a compressed copy at the destination is
/// skipped, so scanning the same directory twice yields nothing the second
/// time.
pub fn pending_segments(src_dir: &Path, pattern: &SegmentPattern, mover: &Mover) -> Vec<ExportTask> {
    let mut pending = Vec::new();
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(event = PcapEvent::Error.as_str(), source:% = src_dir.display(), error:% = e; "failed to scan PCAP files");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(key) = pattern.rotation_key(path) else {
            continue;
        };
        if is_exported(path, mover) {
            debug!(event = PcapEvent::End.as_str(), source:% = path.display(); "PCAP file already exported: {}", path.display());
            continue;
        }
        pending.push(ExportTask::TerminalFlush {
            source: path.to_path_buf(),
            key,
        });
    }
    pending
}

fn is_exported(path: &Path, mover: &Mover) -> bool {
    mover.target_for(path, false).exists() || mover.target_for(path, true).exists()
}

/// Flushes every pending segment of `src_dir` within `timeout`.
pub async fn terminal_flush(
    src_dir: &Path,
    pattern: &SegmentPattern,
    exporter: Arc<Exporter>,
    timeout: Duration,
) -> FlushSummary {
    TerminalFlush::new(src_dir, pattern.clone(), exporter)
        .timeout(timeout)
        .run(&CancellationToken::new())
        .await
}

/// One terminal flush: sync, scan, then export, all inside a single budget.
pub struct TerminalFlush {
    src_dir: PathBuf,
    pattern: SegmentPattern,
    exporter: Arc<Exporter>,
    timeout: Duration,
    sync: fn(),
}

impl TerminalFlush {
    pub fn new(src_dir: impl Into<PathBuf>, pattern: SegmentPattern, exporter: Arc<Exporter>) -> Self {
        Self {
            src_dir: src_dir.into(),
            pattern,
            exporter,
            timeout: FLUSH_TIMEOUT,
            sync: nix::unistd::sync,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the filesystem sync run before the scan.
    pub fn sync_with(mut self, sync: fn()) -> Self {
        self.sync = sync;
        self
    }

    /// Runs the flush until it completes, the budget expires or `cancel`
    /// fires. Exports still running at that point are cancelled and left
    /// behind.
    pub async fn run(self, cancel: &CancellationToken) -> FlushSummary {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let cancel = cancel.child_token();

        let pending = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep_until(deadline) => None,
            pending = self.scan() => Some(pending),
        };
        let Some(pending) = pending else {
            warn!(event = PcapEvent::Error.as_str(), timeout_ms = self.timeout.as_millis() as u64; "PCAP flush stopped before the scan completed");
            return finish(FlushSummary {
                timed_out: true,
                latency: started.elapsed(),
                ..FlushSummary::default()
            });
        };

        let submitted = pending.len();
        let tasks = TaskTracker::new();
        let flushed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        for task in pending {
            let exporter = Arc::clone(&self.exporter);
            let cancel = cancel.clone();
            let flushed = Arc::clone(&flushed);
            let failed = Arc::clone(&failed);
            tasks.spawn(async move {
                match exporter.run(&task, &cancel).await {
                    Ok(_) => flushed.fetch_add(1, Ordering::SeqCst),
                    Err(_) => failed.fetch_add(1, Ordering::SeqCst),
                };
            });
        }
        tasks.close();

        info!(event = PcapEvent::End.as_str(), files = submitted; "waiting for {submitted} PCAP files to be flushed");

        let timed_out = tokio::select! {
            _ = tasks.wait() => false,
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep_until(deadline) => {
                warn!(event = PcapEvent::Error.as_str(), timeout_ms = self.timeout.as_millis() as u64; "PCAP flush timed out");
                true
            }
        };
        if timed_out {
            cancel.cancel();
        }

        finish(FlushSummary {
            submitted,
            flushed: flushed.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            timed_out,
            latency: started.elapsed(),
        })
    }

    /// Syncs filesystems and lists pending segments off the runtime. The work
    /// runs on a detached thread: a stalled sync must not keep the runtime
    /// from shutting down.
    async fn scan(&self) -> Vec<ExportTask> {
        let (tx, rx) = oneshot::channel();
        let src_dir = self.src_dir.clone();
        let pattern = self.pattern.clone();
        let exporter = Arc::clone(&self.exporter);
        let sync = self.sync;

        let spawned = std::thread::Builder::new()
            .name("pcap-flush-scan".into())
            .spawn(move || {
                sync();
                let _ = tx.send(pending_segments(&src_dir, &pattern, exporter.mover()));
            });
        if let Err(e) = spawned {
            warn!(event = PcapEvent::Error.as_str(), error:% = e; "failed to start PCAP flush scan");
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

fn finish(summary: FlushSummary) -> FlushSummary {
    info!(
        event = PcapEvent::End.as_str(),
        files = summary.flushed,
        failed = summary.failed,
        latency_ms = summary.latency.as_millis() as u64;
        "flushed {} PCAP files",
        summary.flushed
    );
    summary
}
