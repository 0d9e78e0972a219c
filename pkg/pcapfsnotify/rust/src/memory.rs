// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Memory relief: capture traffic is write heavy and dirty pages count against
//! the container's cgroup. On every tick the kernel is asked to write back and
//! drop its caches, and the cgroup usage is logged before and after.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeEnv;
use crate::events::PcapEvent;

/// cgroup v1 memory usage counter.
pub const CGROUP_V1_MEMORY_USAGE: &str = "/sys/fs/cgroup/memory/memory.usage_in_bytes";
/// cgroup v2 memory usage counter.
pub const CGROUP_V2_MEMORY_CURRENT: &str = "/sys/fs/cgroup/memory.current";
pub const DROP_CACHES: &str = "/proc/sys/vm/drop_caches";

/// Frees the page cache, dentries and inodes.
const DROP_ALL_CACHES: &[u8] = b"3\n";

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read memory usage from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid memory usage in {}: '{raw}'", path.display())]
    Parse { path: PathBuf, raw: String },
    #[error("failed to drop caches through {}: {source}", path.display())]
    Drop {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Memory usage, in bytes, around one drop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relief {
    pub before: u64,
    pub after: u64,
}

impl Relief {
    /// Bytes released; negative when usage grew in the meantime.
    pub fn released(&self) -> i64 {
        self.before as i64 - self.after as i64
    }
}

#[derive(Debug, Clone)]
pub struct MemoryRelief {
    usage_path: PathBuf,
    drop_caches_path: PathBuf,
    interval: Duration,
}

impl MemoryRelief {
    pub fn new(runtime: RuntimeEnv, interval: Duration) -> Self {
        Self::with_paths(runtime.memory_usage_path(), DROP_CACHES, interval)
    }

    pub fn with_paths(
        usage_path: impl Into<PathBuf>,
        drop_caches_path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            usage_path: usage_path.into(),
            drop_caches_path: drop_caches_path.into(),
            interval,
        }
    }

    pub fn usage_path(&self) -> &Path {
        &self.usage_path
    }

    pub fn usage(&self) -> Result<u64, MemoryError> {
        let raw = std::fs::read_to_string(&self.usage_path).map_err(|source| MemoryError::Read {
            path: self.usage_path.clone(),
            source,
        })?;
        raw.trim().parse().map_err(|_| MemoryError::Parse {
            path: self.usage_path.clone(),
            raw: raw.trim().to_string(),
        })
    }

    /// Writes back dirty pages, then asks the kernel to drop its caches.
    pub fn drop_caches(&self) -> Result<(), MemoryError> {
        nix::unistd::sync();
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.drop_caches_path)
            .and_then(|mut file| io::Write::write_all(&mut file, DROP_ALL_CACHES))
            .map_err(|source| MemoryError::Drop {
                path: self.drop_caches_path.clone(),
                source,
            })
    }

    /// One relief cycle. Returns `None` when the drop request failed; usage
    /// read failures are logged and reported as zero.
    pub fn tick(&self) -> Option<Relief> {
        let before = self.sample("before");
        if let Err(e) = self.drop_caches() {
            warn!(event = PcapEvent::MemoryFlush.as_str(), error:% = e; "failed to flush OS file write buffers");
            return None;
        }
        let after = self.sample("after");
        Some(Relief { before, after })
    }

    fn sample(&self, phase: &str) -> u64 {
        match self.usage() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(event = PcapEvent::MemoryFlush.as_str(), phase = phase, error:% = e; "failed to read memory usage");
                0
            }
        }
    }

    /// Runs one relief cycle per interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        debug!(
            event = PcapEvent::MemoryFlush.as_str(),
            path:% = self.usage_path.display(),
            interval_secs = self.interval.as_secs();
            "starting memory relief"
        );

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let relief = self.clone();
                    let outcome = tokio::task::spawn_blocking(move || relief.tick()).await;
                    if let Ok(Some(relief)) = outcome {
                        info!(
                            event = PcapEvent::MemoryFlush.as_str(),
                            before = relief.before,
                            after = relief.after,
                            released = relief.released();
                            "flushed OS file write buffers: {} -> {} bytes",
                            relief.before,
                            relief.after
                        );
                    }
                }
            }
        }

        debug!(event = PcapEvent::MemoryFlush.as_str(); "memory relief stopped");
    }
}
