// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Timed acquisition of the companion's lock file. The capture supervisor
//! holds an exclusive `flock` on it while any capture engine runs; taking it
//! here means every engine has stopped writing segments.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to lock {}: {source}", path.display())]
    Flock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("timed out after {timeout:?} waiting for lock file {}", path.display())]
    TimedOut { path: PathBuf, timeout: Duration },
    #[error("cancelled while waiting for lock file {}", path.display())]
    Cancelled { path: PathBuf },
}

/// Exclusive lock on the companion lock file; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    _lock: Flock<File>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum Attempt {
    Acquired(Flock<File>),
    Busy,
}

fn try_lock(path: &Path) -> Result<Attempt, LockError> {
    // Never created here: a missing file means the companion has not released it yet.
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Attempt::Busy),
        Err(source) => {
            return Err(LockError::Open {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(Attempt::Acquired(lock)),
        Err((_, Errno::EWOULDBLOCK)) | Err((_, Errno::EINTR)) => Ok(Attempt::Busy),
        Err((_, source)) => Err(LockError::Flock {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Polls for an exclusive lock on `path` until it is acquired, `timeout`
/// elapses, or `cancel` fires.
pub async fn acquire_exclusive(
    path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<LockGuard, LockError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Attempt::Acquired(lock) = try_lock(path)? {
            return Ok(LockGuard {
                path: path.to_path_buf(),
                _lock: lock,
            });
        }
        if Instant::now() + LOCK_POLL_INTERVAL > deadline {
            return Err(LockError::TimedOut {
                path: path.to_path_buf(),
                timeout,
            });
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(LockError::Cancelled { path: path.to_path_buf() });
            }
            _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
        }
    }
}
