// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

mod helpers;

use helpers::{DEFAULT_TIMEOUT, DaemonHandle, Layout, wait_for_file, wait_for_removal};
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::Signal;
use std::fs::File;
use std::time::{Duration, Instant};

const FIRST: &str = "part__0_eth0__20240101T000000.pcap";
const SECOND: &str = "part__0_eth0__20240101T000100.pcap";

// ===========================================================================
// Group 1: Streaming export
// ===========================================================================

#[test]
fn test_rotation_exports_previous_segment() {
    let layout = Layout::new();
    let mut daemon = DaemonHandle::start(&layout, &[]);
    assert!(daemon.wait_ready(), "sidecar should start watching");

    let first = layout.segment(FIRST);
    assert!(daemon.wait_for_log_default("queued PCAP file"));
    let second = layout.segment(SECOND);

    assert!(
        wait_for_file(&layout.exported(FIRST), DEFAULT_TIMEOUT),
        "first segment should be exported after rotation"
    );
    assert!(
        wait_for_removal(&first, DEFAULT_TIMEOUT),
        "exported segment should be deleted"
    );
    assert!(second.exists(), "active segment must not be touched");
    assert!(!layout.exported(SECOND).exists());

    daemon.send_signal(Signal::SIGTERM);
    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    assert!(status.success(), "sidecar should exit cleanly");
    assert!(
        layout.exported(SECOND).exists(),
        "active segment should be flushed on shutdown"
    );
}

#[test]
fn test_gzip_export() {
    let layout = Layout::new();
    let mut daemon = DaemonHandle::start(&layout, &["--gzip", "--delete", "false"]);
    assert!(daemon.wait_ready());

    let first = layout.segment(FIRST);
    assert!(daemon.wait_for_log_default("queued PCAP file"));
    layout.segment(SECOND);

    let gz = layout.dst.join(format!("{FIRST}.gz"));
    assert!(wait_for_file(&gz, DEFAULT_TIMEOUT), "compressed export expected");
    assert!(daemon.wait_for_log_default("exported PCAP file"));
    assert!(first.exists(), "source kept without --delete");

    daemon.send_signal(Signal::SIGINT);
    assert!(daemon.wait_with_timeout(DEFAULT_TIMEOUT).success());
}

// ===========================================================================
// Group 2: Shutdown
// ===========================================================================

#[test]
fn test_sentinel_flushes_and_exits() {
    let layout = Layout::new();
    let mut daemon = DaemonHandle::start(&layout, &[]);
    assert!(daemon.wait_ready());

    layout.segment(FIRST);
    layout.segment("part__1_eth1__20240101T000000.pcap");
    assert!(daemon.wait_for_log_default("queued PCAP file"));
    let sentinel = layout.src.join("TCPDUMPW_EXITED");
    std::fs::write(&sentinel, "").unwrap();

    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    assert!(status.success(), "sidecar should exit on its own after the sentinel");
    assert!(daemon.wait_for_log_default("detected 'tcpdumpw' termination signal"));
    assert!(!sentinel.exists(), "sentinel should be removed");
    assert!(layout.exported(FIRST).exists());
    assert!(layout.exported("part__1_eth1__20240101T000000.pcap").exists());
    assert!(daemon.wait_for_log_default("flushed 2 PCAP files"));
}

#[test]
fn test_signal_with_free_lock_exits_early() {
    let layout = Layout::new();
    let mut daemon = DaemonHandle::start(&layout, &["--deadline", "30"]);
    assert!(daemon.wait_ready());

    let started = Instant::now();
    daemon.send_signal(Signal::SIGTERM);
    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);

    assert!(status.success());
    assert!(
        started.elapsed() < Duration::from_secs(9),
        "lock release should cut the deadline short"
    );
    assert!(daemon.wait_for_log_default("signaled: SIGTERM"));
    assert!(daemon.wait_for_log_default("acquired PCAP lock file"));
}

#[test]
fn test_signal_with_held_lock_waits_for_deadline() {
    let layout = Layout::new();
    let _held = Flock::lock(
        File::open(&layout.lock).unwrap(),
        FlockArg::LockExclusiveNonblock,
    )
    .unwrap();
    let mut daemon = DaemonHandle::start(&layout, &["--deadline", "1"]);
    assert!(daemon.wait_ready());
    layout.segment(FIRST);
    assert!(daemon.wait_for_log_default("queued PCAP file"));

    let started = Instant::now();
    daemon.send_signal(Signal::SIGHUP);
    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    let elapsed = started.elapsed();

    assert!(status.success());
    assert!(elapsed >= Duration::from_millis(900), "exited before the deadline: {elapsed:?}");
    assert!(daemon.wait_for_log_default("cancelling PCAP watcher: deadline"));
    assert!(daemon.wait_for_log_default("PCAP export sidecar terminated"));
    assert_eq!(daemon.count_log_matches("cancelling PCAP watcher"), 1);
    assert!(layout.exported(FIRST).exists());
}

// ===========================================================================
// Group 3: Initialization
// ===========================================================================

#[test]
fn test_missing_source_directory_is_fatal() {
    let layout = Layout::new();
    let missing = layout.src.join("missing");
    let mut daemon = DaemonHandle::start_with_src(&layout, &missing, &[]);

    let status = daemon.wait_with_timeout(DEFAULT_TIMEOUT);
    assert!(!status.success(), "sidecar should fail without a source directory");
    assert!(daemon.wait_for_log_default("failed to start PCAP export sidecar"));
}

#[test]
fn test_log_lines_are_json() {
    let layout = Layout::new();
    let mut daemon = DaemonHandle::start(&layout, &[]);
    assert!(daemon.wait_ready());
    daemon.send_signal(Signal::SIGQUIT);
    assert!(daemon.wait_with_timeout(DEFAULT_TIMEOUT).success());

    assert!(daemon.wait_for_log_default("\"event\":\"PCAP_FSNINI\""));
    assert!(daemon.wait_for_log_default("\"severity\":\"INFO\""));
    assert!(daemon.wait_for_log_default("\"event\":\"PCAP_FSNEND\""));
}
