// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use log::Level;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{PcapEvent, fs_event};

/// Suffix appended to compressed exports.
pub const GZIP_SUFFIX: &str = "gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total copy attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveOptions {
    pub compress: bool,
    pub delete_on_success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub target: PathBuf,
    /// Bytes read from the source (before compression).
    pub bytes: u64,
    pub attempts: u32,
    pub deleted: bool,
}

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("failed to open source {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create destination {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy {} into {} after {attempts} attempt(s): {source}", from.display(), to.display())]
    Exhausted {
        from: PathBuf,
        to: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("copy of {} cancelled after {attempts} attempt(s)", path.display())]
    Cancelled { path: PathBuf, attempts: u32 },
    #[error("terminal flush of {} refused while the watcher is active", path.display())]
    Refused { path: PathBuf },
}

/// Copy step of an export. Runs on a blocking thread with both handles
/// positioned at their start.
pub trait Copier: Send + Sync {
    fn copy(&self, input: &mut File, output: &mut File, compress: bool) -> io::Result<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCopier;

impl Copier for StreamCopier {
    fn copy(&self, input: &mut File, output: &mut File, compress: bool) -> io::Result<u64> {
        if compress {
            let mut encoder = GzEncoder::new(output, Compression::default());
            let copied = io::copy(input, &mut encoder)?;
            encoder.finish()?.flush()?;
            Ok(copied)
        } else {
            let copied = io::copy(input, output)?;
            output.flush()?;
            Ok(copied)
        }
    }
}

/// Copies segments into the destination directory, retrying the copy step.
pub struct Mover {
    destination: PathBuf,
    retry: RetryPolicy,
    copier: Arc<dyn Copier>,
}

impl Mover {
    pub fn new(destination: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            destination: destination.into(),
            retry,
            copier: Arc::new(StreamCopier),
        }
    }

    pub fn with_copier(mut self, copier: Arc<dyn Copier>) -> Self {
        self.copier = copier;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn target_for(&self, source: &Path, compress: bool) -> PathBuf {
        let name = source.file_name().unwrap_or(source.as_os_str());
        let mut target = self.destination.join(name).into_os_string();
        if compress {
            target.push(".");
            target.push(GZIP_SUFFIX);
        }
        PathBuf::from(target)
    }

    /// Copies `source` into the destination directory.
    ///
    /// Only the copy step is retried; failing to open the source or to create
    /// the destination fails immediately. On exhaustion or cancellation the
    /// partial destination is removed and the source is left in place.
    pub async fn move_file(
        &self,
        source: &Path,
        options: MoveOptions,
        cancel: &CancellationToken,
    ) -> Result<MoveReport, MoveError> {
        let target = self.target_for(source, options.compress);

        let input = match tokio::fs::File::open(source).await {
            Ok(file) => file.into_std().await,
            Err(e) => {
                fs_event(
                    Level::Error,
                    PcapEvent::Export,
                    source,
                    &target,
                    0,
                    Some(&e),
                    format_args!("failed to OPEN file {}", source.display()),
                );
                return Err(MoveError::Open {
                    path: source.to_path_buf(),
                    source: e,
                });
            }
        };

        let output = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file.into_std().await,
            Err(e) => {
                fs_event(
                    Level::Error,
                    PcapEvent::Export,
                    source,
                    &target,
                    0,
                    Some(&e),
                    format_args!("failed to CREATE file: {}", target.display()),
                );
                return Err(MoveError::Create { path: target, source: e });
            }
        };

        let copied = self
            .copy_with_retry(input, output, source, &target, options.compress, cancel)
            .await;

        let (bytes, attempts) = match copied {
            Ok(done) => done,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&target).await {
                    fs_event(
                        Level::Warn,
                        PcapEvent::Export,
                        source,
                        &target,
                        0,
                        Some(&rm),
                        format_args!("failed to remove partial file: {}", target.display()),
                    );
                }
                return Err(e);
            }
        };

        fs_event(
            Level::Info,
            PcapEvent::Export,
            source,
            &target,
            bytes,
            None,
            format_args!("COPIED: {}", source.display()),
        );

        let mut deleted = false;
        if options.delete_on_success {
            match tokio::fs::remove_file(source).await {
                Ok(()) => {
                    deleted = true;
                    fs_event(
                        Level::Info,
                        PcapEvent::Export,
                        source,
                        &target,
                        bytes,
                        None,
                        format_args!("DELETED: {}", source.display()),
                    );
                }
                Err(e) => fs_event(
                    Level::Error,
                    PcapEvent::Export,
                    source,
                    &target,
                    bytes,
                    Some(&e),
                    format_args!("failed to DELETE file: {}", source.display()),
                ),
            }
        }

        Ok(MoveReport {
            target,
            bytes,
            attempts,
            deleted,
        })
    }

    async fn copy_with_retry(
        &self,
        input: File,
        output: File,
        source: &Path,
        target: &Path,
        compress: bool,
        cancel: &CancellationToken,
    ) -> Result<(u64, u32), MoveError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut handles = (input, output);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let copier = Arc::clone(&self.copier);
            let (mut input, mut output) = handles;
            let joined = tokio::task::spawn_blocking(move || {
                let copied = rewind(&mut input, &mut output)
                    .and_then(|()| copier.copy(&mut input, &mut output, compress));
                (input, output, copied)
            })
            .await;

            let error = match joined {
                Ok((input, output, Ok(bytes))) => {
                    drop((input, output));
                    return Ok((bytes, attempt));
                }
                Ok((input, output, Err(e))) => {
                    handles = (input, output);
                    e
                }
                Err(join) => {
                    // The handles went down with the blocking task.
                    let e = io::Error::other(join);
                    fs_event(
                        Level::Error,
                        PcapEvent::Export,
                        source,
                        target,
                        0,
                        Some(&e),
                        format_args!("failed to COPY file: {}", source.display()),
                    );
                    return Err(MoveError::Exhausted {
                        from: source.to_path_buf(),
                        to: target.to_path_buf(),
                        attempts: attempt,
                        source: e,
                    });
                }
            };

            if attempt >= max_attempts {
                fs_event(
                    Level::Error,
                    PcapEvent::Export,
                    source,
                    target,
                    0,
                    Some(&error),
                    format_args!("failed to COPY file: {}", source.display()),
                );
                return Err(MoveError::Exhausted {
                    from: source.to_path_buf(),
                    to: target.to_path_buf(),
                    attempts: attempt,
                    source: error,
                });
            }

            fs_event(
                Level::Warn,
                PcapEvent::Export,
                source,
                target,
                0,
                Some(&error),
                format_args!("failed to COPY file at attempt {attempt}: {}", source.display()),
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(MoveError::Cancelled {
                        path: source.to_path_buf(),
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(self.retry.delay) => {}
            }
        }
    }
}

fn rewind(input: &mut File, output: &mut File) -> io::Result<()> {
    input.seek(SeekFrom::Start(0))?;
    output.set_len(0)?;
    output.seek(SeekFrom::Start(0))?;
    Ok(())
}
