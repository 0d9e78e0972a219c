// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::dispatcher::Dispatcher;
use crate::events::PcapEvent;
use crate::segment::is_sentinel;
use crate::shutdown::{CancelReason, ShutdownTrigger};

/// Filesystem events buffered between the notify thread and the watcher loop.
/// A full buffer blocks the notify thread until the loop catches up.
pub const EVENT_BUFFER: usize = 100;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create filesystem watcher: {0}")]
    Create(#[source] notify::Error),
    #[error("failed to watch {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Live inotify registration on the source directory.
pub struct SourceWatcher {
    src_dir: PathBuf,
    watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
}

impl SourceWatcher {
    pub fn new(src_dir: impl Into<PathBuf>) -> Result<Self, WatchError> {
        let src_dir = src_dir.into();
        info!(event = PcapEvent::Init.as_str(); "starting PCAP filesystem watcher");

        let (tx, events) = mpsc::channel::<notify::Result<Event>>(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Runs on the notify thread, outside the runtime. Fails once the
            // watcher loop stopped and closed the receiver.
            let _ = tx.blocking_send(res);
        })
        .map_err(WatchError::Create)?;

        watcher
            .watch(&src_dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Register {
                path: src_dir.clone(),
                source,
            })?;
        info!(event = PcapEvent::Init.as_str(), source:% = src_dir.display(); "watching directory: {}", src_dir.display());

        Ok(Self {
            src_dir,
            watcher,
            events,
        })
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    /// Consumes creation events until the shared cancellation fires, then
    /// removes the registration. Returns the number of events handled.
    pub async fn run(mut self, dispatcher: &Dispatcher, trigger: &ShutdownTrigger) -> u64 {
        let mut handled = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = trigger.cancelled() => break,
                received = self.events.recv() => match received {
                    Some(Ok(event)) => {
                        handled += self.handle(event, dispatcher, trigger);
                    }
                    Some(Err(e)) => {
                        error!(event = PcapEvent::Error.as_str(), error:% = e; "PCAP filesystem watcher error: {e}");
                    }
                    None => {
                        warn!(event = PcapEvent::Error.as_str(); "PCAP filesystem watcher event stream closed");
                        trigger.fire(CancelReason::WatcherClosed);
                        break;
                    }
                },
            }
        }
        self.stop();
        handled
    }

    fn handle(&self, event: Event, dispatcher: &Dispatcher, trigger: &ShutdownTrigger) -> u64 {
        let mut handled = 0;
        for path in created_paths(&event) {
            handled += 1;
            if is_sentinel(path) {
                self.on_sentinel(path, trigger);
            } else {
                dispatcher.dispatch(path);
            }
        }
        handled
    }

    fn on_sentinel(&self, path: &Path, trigger: &ShutdownTrigger) {
        info!(
            event = PcapEvent::Signal.as_str(),
            source:% = path.display();
            "detected 'tcpdumpw' termination signal"
        );
        if let Err(e) = std::fs::remove_file(path) {
            warn!(event = PcapEvent::Error.as_str(), source:% = path.display(), error:% = e; "failed to remove termination sentinel");
        }
        trigger.fire(CancelReason::Sentinel);
    }

    fn stop(mut self) {
        // Unblocks a notify thread waiting on a full buffer before unwatching.
        self.events.close();
        if let Err(e) = self.watcher.unwatch(&self.src_dir) {
            warn!(event = PcapEvent::Error.as_str(), source:% = self.src_dir.display(), error:% = e; "failed to remove PCAP filesystem watch");
        }
        info!(event = PcapEvent::End.as_str(), source:% = self.src_dir.display(); "stopped PCAP filesystem watcher");
    }
}

/// Paths that appeared in the watched directory, whether created there or
/// renamed into it. inotify reports every arrival by rename as `To`, paired
/// with a `Both` when the old name was watched too, so `Both` is a duplicate.
fn created_paths(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.as_slice()
        }
        _ => &[],
    }
}
