// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Turns segment create-events into export tasks.
//!
//! The first segment of a key is only recorded. Every later one supersedes the
//! recorded segment, which is exported on its own task so a slow or retrying
//! copy never holds up the event loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::events::PcapEvent;
use crate::export::{ExportTask, Exporter};
use crate::segment::{RotationKey, SegmentPattern};
use crate::tracker::{Rotation, RotationTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a segment.
    Ignored,
    /// First segment of its key.
    Recorded,
    /// The predecessor was unknown; nothing exported.
    Orphaned,
    /// `previous` is being exported. `leaked` is set when a concurrent
    /// dispatch had already moved the active pointer.
    Exporting { previous: PathBuf, leaked: bool },
}

pub struct Dispatcher {
    pattern: SegmentPattern,
    tracker: Arc<RotationTracker>,
    exporter: Arc<Exporter>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        pattern: SegmentPattern,
        tracker: Arc<RotationTracker>,
        exporter: Arc<Exporter>,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pattern,
            tracker,
            exporter,
            tasks,
            cancel,
        }
    }

    pub fn pattern(&self) -> &SegmentPattern {
        &self.pattern
    }

    pub fn tracker(&self) -> &Arc<RotationTracker> {
        &self.tracker
    }

    /// Handles the creation of `path`. Must be called within a tokio runtime.
    pub fn dispatch(&self, path: &Path) -> Dispatch {
        let Some(key) = self.pattern.rotation_key(path) else {
            return Dispatch::Ignored;
        };

        let rotation = self.tracker.observe(&key, path);
        let iteration = rotation.iteration();
        info!(
            event = PcapEvent::Create.as_str(),
            source:% = path.display(),
            key:% = key,
            ext = key.ext.as_str(),
            iface:% = key.iface(),
            iteration = iteration;
            "new PCAP file detected: {}",
            path.display()
        );

        match rotation {
            Rotation::First => {
                queued(&key, path, iteration);
                Dispatch::Recorded
            }
            Rotation::Orphaned { .. } => {
                error!(
                    event = PcapEvent::Error.as_str(),
                    source:% = path.display(),
                    key:% = key,
                    ext = key.ext.as_str(),
                    iface:% = key.iface(),
                    iteration = iteration;
                    "PCAP file [{key}] unavailable"
                );
                Dispatch::Orphaned
            }
            Rotation::Superseded { previous, iteration } => {
                self.spawn_export(ExportTask::Streaming {
                    source: previous.clone(),
                    key: key.clone(),
                    iteration,
                });

                let leaked = !self.tracker.advance(&key, &previous, path);
                if leaked {
                    error!(
                        event = PcapEvent::Error.as_str(),
                        source:% = previous.display(),
                        target:% = path.display(),
                        key:% = key,
                        ext = key.ext.as_str(),
                        iface:% = key.iface(),
                        iteration = iteration;
                        "leaked PCAP file: {}",
                        previous.display()
                    );
                }
                queued(&key, path, iteration);
                Dispatch::Exporting { previous, leaked }
            }
        }
    }

    fn spawn_export(&self, task: ExportTask) {
        let exporter = Arc::clone(&self.exporter);
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            // Outcome already logged by the exporter.
            let _ = exporter.run(&task, &cancel).await;
        });
    }
}

fn queued(key: &RotationKey, path: &Path, iteration: u64) {
    info!(
        event = PcapEvent::Queued.as_str(),
        source:% = path.display(),
        key:% = key,
        ext = key.ext.as_str(),
        iface:% = key.iface(),
        iteration = iteration;
        "queued PCAP file: {}",
        path.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mover::{MoveOptions, Mover, RetryPolicy};
    use crate::shutdown::Lifecycle;
    use std::time::Duration;

    struct Fixture {
        src: tempfile::TempDir,
        dst: tempfile::TempDir,
        tasks: TaskTracker,
        dispatcher: Dispatcher,
    }

    fn fixture(options: MoveOptions) -> Fixture {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let retry = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        };
        let exporter = Exporter::new(Mover::new(dst.path(), retry), options, Arc::new(Lifecycle::new()));
        let tasks = TaskTracker::new();
        let dispatcher = Dispatcher::new(
            SegmentPattern::new(&["pcap"]).unwrap(),
            Arc::new(RotationTracker::new()),
            Arc::new(exporter),
            tasks.clone(),
            CancellationToken::new(),
        );
        Fixture {
            src,
            dst,
            tasks,
            dispatcher,
        }
    }

    fn create(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    async fn settle(tasks: &TaskTracker) {
        tasks.close();
        tokio::time::timeout(Duration::from_secs(5), tasks.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rotation_exports_previous_segment() {
        let f = fixture(MoveOptions {
            compress: false,
            delete_on_success: true,
        });
        let first = create(f.src.path(), "part__0_eth0__20240101T000000.pcap");
        let second = create(f.src.path(), "part__0_eth0__20240101T000100.pcap");

        assert_eq!(f.dispatcher.dispatch(&first), Dispatch::Recorded);
        assert_eq!(
            f.dispatcher.dispatch(&second),
            Dispatch::Exporting {
                previous: first.clone(),
                leaked: false
            }
        );
        settle(&f.tasks).await;

        let exported = f.dst.path().join("part__0_eth0__20240101T000000.pcap");
        assert_eq!(
            std::fs::read_to_string(exported).unwrap(),
            "part__0_eth0__20240101T000000.pcap"
        );
        assert!(!first.exists());
        assert!(second.exists(), "active segment must stay in place");
        let key = RotationKey::new(0, "eth0", "pcap");
        assert_eq!(f.dispatcher.tracker().active_segment(&key), Some(second));
    }

    #[tokio::test]
    async fn test_compressed_export_name() {
        let f = fixture(MoveOptions {
            compress: true,
            delete_on_success: false,
        });
        let first = create(f.src.path(), "part__0_eth0__20240101T000000.pcap");
        let second = create(f.src.path(), "part__0_eth0__20240101T000100.pcap");
        f.dispatcher.dispatch(&first);
        f.dispatcher.dispatch(&second);
        settle(&f.tasks).await;

        assert!(
            f.dst
                .path()
                .join("part__0_eth0__20240101T000000.pcap.gz")
                .exists()
        );
        assert!(first.exists());
    }

    #[tokio::test]
    async fn test_n_events_export_n_minus_one() {
        let f = fixture(MoveOptions::default());
        let mut exports = 0;
        for minute in 0..6 {
            let path = create(
                f.src.path(),
                &format!("part__3_any__20240101T00{minute:02}00.pcap"),
            );
            if let Dispatch::Exporting { leaked, .. } = f.dispatcher.dispatch(&path) {
                assert!(!leaked);
                exports += 1;
            }
        }
        settle(&f.tasks).await;

        assert_eq!(exports, 5);
        assert_eq!(std::fs::read_dir(f.dst.path()).unwrap().count(), 5);
        assert!(
            !f.dst
                .path()
                .join("part__3_any__20240101T000500.pcap")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_non_segments_ignored() {
        let f = fixture(MoveOptions::default());
        let other = create(f.src.path(), "notes.txt");
        let sentinel = create(f.src.path(), crate::segment::SENTINEL_FILE_NAME);
        assert_eq!(f.dispatcher.dispatch(&other), Dispatch::Ignored);
        assert_eq!(f.dispatcher.dispatch(&sentinel), Dispatch::Ignored);
        assert!(f.dispatcher.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_streams_do_not_pair_across_keys() {
        let f = fixture(MoveOptions::default());
        let eth0 = create(f.src.path(), "part__0_eth0__20240101T000000.pcap");
        let eth1 = create(f.src.path(), "part__1_eth1__20240101T000000.pcap");
        assert_eq!(f.dispatcher.dispatch(&eth0), Dispatch::Recorded);
        assert_eq!(f.dispatcher.dispatch(&eth1), Dispatch::Recorded);
        settle(&f.tasks).await;
        assert_eq!(std::fs::read_dir(f.dst.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_rotation_logs_key_fields() {
        crate::testlog::capture();
        let f = fixture(MoveOptions::default());
        let key = RotationKey::new(0, "eth0", "pcap");
        let first = create(f.src.path(), "part__0_eth0__20240101T000000.pcap");
        let second = create(f.src.path(), "part__0_eth0__20240101T000100.pcap");

        assert_eq!(f.dispatcher.dispatch(&first), Dispatch::Recorded);
        f.dispatcher.tracker().clear(&key);
        assert_eq!(f.dispatcher.dispatch(&second), Dispatch::Orphaned);
        settle(&f.tasks).await;

        let source = second.display().to_string();
        assert_eq!(crate::testlog::count("source", &source, "PCAP file [0/eth0/pcap] unavailable"), 1);
        let lines = crate::testlog::records("source", &source);
        assert!(!lines.is_empty());
        for line in lines {
            assert_eq!(line["key"], "0/eth0/pcap", "{line}");
            assert_eq!(line["ext"], "pcap", "{line}");
            assert_eq!(line["iface"], "0:eth0", "{line}");
        }
        assert_eq!(f.dispatcher.tracker().active_segment(&key), Some(second));
    }
}
