// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Temporary source and destination directories plus the lock file.
pub struct Layout {
    _root: tempfile::TempDir,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub lock: PathBuf,
}

impl Layout {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("pcap-tmp");
        let dst = root.path().join("pcap");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        let lock = root.path().join("pcap.lock");
        std::fs::write(&lock, "").unwrap();
        Self {
            _root: root,
            src,
            dst,
            lock,
        }
    }

    /// Writes `name` into the source directory, its content being the name.
    pub fn segment(&self, name: &str) -> PathBuf {
        let path = self.src.join(name);
        std::fs::write(&path, name)
            .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
        path
    }

    pub fn exported(&self, name: &str) -> PathBuf {
        self.dst.join(name)
    }
}

type Lines = Arc<Mutex<Vec<String>>>;

/// Polls `ready` every 50ms until it holds or `timeout` elapses.
pub fn poll_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let give_up = Instant::now() + timeout;
    while !ready() {
        if Instant::now() >= give_up {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    true
}

pub fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    poll_until(timeout, || path.exists())
}

pub fn wait_for_removal(path: &Path, timeout: Duration) -> bool {
    poll_until(timeout, || !path.exists())
}

/// Mirrors every line of `stream` to the test output under `tag` and keeps it
/// in `lines`.
fn tee_lines(stream: impl Read + Send + 'static, tag: &'static str, lines: Lines) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            eprintln!("[{tag}] {line}");
            lines.lock().unwrap().push(line);
        }
    })
}

/// The sidecar binary running against a [`Layout`]. Killed on drop.
pub struct DaemonHandle {
    child: Child,
    lines: Lines,
    _tees: [JoinHandle<()>; 2],
}

impl DaemonHandle {
    /// Runs the sidecar on `layout` with a one hour rotation interval, which
    /// keeps memory relief out of the way. `extra` goes last on the command line.
    pub fn start(layout: &Layout, extra: &[&str]) -> Self {
        Self::start_with_src(layout, &layout.src, extra)
    }

    pub fn start_with_src(layout: &Layout, src: &Path, extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_dd-pcap-fsnotify"))
            .arg("--src_dir")
            .arg(src)
            .arg("--gcs_dir")
            .arg(&layout.dst)
            .arg("--lock_file")
            .arg(&layout.lock)
            .args(["--interval", "3600", "--retries_delay", "1"])
            .args(extra)
            .env("DD_LOG_LEVEL", "debug")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap_or_else(|e| panic!("cannot run the sidecar binary: {e}"));

        let lines = Lines::default();
        // JSON logs on stdout; clap usage errors and panics on stderr.
        let tees = [
            tee_lines(child.stdout.take().unwrap(), "stdout", Arc::clone(&lines)),
            tee_lines(child.stderr.take().unwrap(), "stderr", Arc::clone(&lines)),
        ];
        Self {
            child,
            lines,
            _tees: tees,
        }
    }

    /// Lines printed so far that contain `needle`.
    pub fn count_log_matches(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    pub fn wait_for_log(&self, needle: &str, timeout: Duration) -> bool {
        poll_until(timeout, || self.count_log_matches(needle) > 0)
    }

    pub fn wait_for_log_default(&self, needle: &str) -> bool {
        self.wait_for_log(needle, DEFAULT_TIMEOUT)
    }

    /// True once the source directory watch is registered.
    pub fn wait_ready(&self) -> bool {
        self.wait_for_log_default("watching directory")
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = Pid::from_raw(self.child.id() as i32);
        signal::kill(pid, sig).unwrap_or_else(|e| panic!("cannot deliver {sig:?}: {e}"));
    }

    /// Exit status of the sidecar. A process still running after `timeout` is
    /// killed, so the status then reports the kill.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let mut status = None;
        poll_until(timeout, || {
            status = self.child.try_wait().unwrap();
            status.is_some()
        });
        status.unwrap_or_else(|| {
            let _ = self.child.kill();
            self.child.wait().unwrap()
        })
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
