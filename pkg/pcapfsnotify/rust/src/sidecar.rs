// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::events::PcapEvent;
use crate::export::Exporter;
use crate::flush::{FLUSH_TIMEOUT, FlushSummary, terminal_flush};
use crate::memory::MemoryRelief;
use crate::mover::{MoveOptions, Mover};
use crate::segment::SegmentPattern;
use crate::shutdown::{Lifecycle, ShutdownCoordinator, ShutdownState, ShutdownTrigger, SignalListener};
use crate::tracker::RotationTracker;
use crate::watcher::SourceWatcher;

/// Wires the watcher, the exporters, memory relief, and the shutdown
/// coordinator together for one run of the process.
pub struct Sidecar {
    config: Config,
    memory: MemoryRelief,
}

impl Sidecar {
    pub fn new(config: Config) -> Self {
        let memory = MemoryRelief::new(config.runtime, config.interval);
        Self { config, memory }
    }

    /// Replaces the memory relief loop (cgroup and drop-caches paths).
    pub fn with_memory_relief(mut self, memory: MemoryRelief) -> Self {
        self.memory = memory;
        self
    }

    pub async fn run(self) -> Result<FlushSummary> {
        let signals = SignalListener::install().context("failed to install signal handlers")?;
        self.run_with_signals(signals).await
    }

    /// Runs until a signal or the capture sentinel ends the watcher, then
    /// flushes whatever is left in the source directory.
    pub async fn run_with_signals(self, signals: SignalListener) -> Result<FlushSummary> {
        let config = self.config;
        info!(
            event = PcapEvent::Init.as_str(),
            src_dir:% = config.src_dir.display(),
            gcs_dir:% = config.dst_dir.display(),
            ext:% = config.extensions.join(","),
            gzip = config.compress,
            delete = config.delete,
            interval_secs = config.interval.as_secs(),
            retries_max = config.retry.max_attempts,
            retries_delay_secs = config.retry.delay.as_secs();
            "starting PCAP export sidecar"
        );

        let pattern = SegmentPattern::new(&config.extensions).context("invalid segment extensions")?;
        let watcher = SourceWatcher::new(&config.src_dir)
            .with_context(|| format!("failed to watch {}", config.src_dir.display()))?;

        let lifecycle = Arc::new(Lifecycle::new());
        let trigger = ShutdownTrigger::new(Arc::clone(&lifecycle));
        let exporter = Arc::new(Exporter::new(
            Mover::new(&config.dst_dir, config.retry),
            MoveOptions {
                compress: config.compress,
                delete_on_success: config.delete,
            },
            Arc::clone(&lifecycle),
        ));
        let tasks = TaskTracker::new();
        let dispatcher = Dispatcher::new(
            pattern.clone(),
            Arc::new(RotationTracker::new()),
            Arc::clone(&exporter),
            tasks.clone(),
            trigger.token(),
        );

        let memory = tokio::spawn(self.memory.run(trigger.token()));
        let coordinator = tokio::spawn(
            ShutdownCoordinator::new(trigger.clone(), &config.lock_file, config.drain_deadline)
                .run(signals),
        );

        let handled = watcher.run(&dispatcher, &trigger).await;

        tasks.close();
        if !tasks.is_empty() {
            info!(event = PcapEvent::End.as_str(), tasks = tasks.len(); "waiting for in-flight PCAP exports");
        }
        tasks.wait().await;

        let summary = terminal_flush(&config.src_dir, &pattern, exporter, FLUSH_TIMEOUT).await;

        if !lifecycle.transition(ShutdownState::Draining, ShutdownState::Terminated) {
            warn!(event = PcapEvent::Error.as_str(), state:% = lifecycle.state(); "unexpected shutdown state");
        }

        if let Err(e) = memory.await {
            warn!(event = PcapEvent::Error.as_str(), error:% = e; "memory relief task failed");
        }
        match coordinator.await {
            Ok(Some(outcome)) => info!(event = PcapEvent::Signal.as_str(), outcome:? = outcome; "drain finished: {outcome:?}"),
            Ok(None) => {}
            Err(e) => warn!(event = PcapEvent::Error.as_str(), error:% = e; "shutdown coordinator task failed"),
        }

        info!(
            event = PcapEvent::End.as_str(),
            events = handled,
            files = summary.flushed,
            latency_ms = summary.latency.as_millis() as u64;
            "PCAP export sidecar terminated"
        );
        Ok(summary)
    }
}
