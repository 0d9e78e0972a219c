// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use log::{info, warn};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::PcapEvent;
use crate::lock::{LockError, acquire_exclusive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    /// Watcher running and accepting events.
    Active = 0,
    /// Signal or sentinel received; in-flight and remaining files are flushed.
    Draining = 1,
    /// Terminal flush finished.
    Terminated = 2,
}

impl ShutdownState {
    pub(crate) fn can_transition_to(self, next: ShutdownState) -> bool {
        use ShutdownState::*;
        matches!((self, next), (Active, Draining) | (Draining, Terminated))
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ShutdownState::Active,
            1 => ShutdownState::Draining,
            _ => ShutdownState::Terminated,
        }
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownState::Active => write!(f, "active"),
            ShutdownState::Draining => write!(f, "draining"),
            ShutdownState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Process-wide shutdown state.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Active as u8),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ShutdownState::Active
    }

    /// Moves from `from` to `to`; fails if the transition is not allowed or
    /// another caller got there first.
    pub fn transition(&self, from: ShutdownState, to: ShutdownState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The capture process created its exit sentinel.
    Sentinel,
    /// The companion released the lock file.
    LockAcquired,
    /// The drain deadline expired.
    Deadline,
    /// The filesystem event stream ended.
    WatcherClosed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Sentinel => write!(f, "sentinel"),
            CancelReason::LockAcquired => write!(f, "lock acquired"),
            CancelReason::Deadline => write!(f, "deadline"),
            CancelReason::WatcherClosed => write!(f, "watcher closed"),
        }
    }
}

/// Shared cancellation with a single-fire guard: racing sources (sentinel,
/// lock, deadline) cancel at most once.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    lifecycle: Arc<Lifecycle>,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            lifecycle,
            cancel: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Leaves `Active`. Returns `false` if draining had already begun.
    pub fn begin_drain(&self) -> bool {
        self.lifecycle
            .transition(ShutdownState::Active, ShutdownState::Draining)
    }

    /// Cancels the shared token. Only the first caller has any effect and
    /// gets `true`.
    pub fn fire(&self, reason: CancelReason) -> bool {
        self.begin_drain();
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(event = PcapEvent::Signal.as_str(), reason:% = reason; "cancelling PCAP watcher: {reason}");
        self.cancel.cancel();
        true
    }
}

/// OS termination signals: SIGTERM, SIGINT, SIGHUP, SIGQUIT.
pub struct SignalListener {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
    sigquit: Signal,
}

impl SignalListener {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Waits for the next termination signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sighup.recv() => "SIGHUP",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The companion released the lock before the deadline.
    LockAcquired,
    /// Cancellation was forced by the deadline.
    DeadlineExpired,
    /// Another source cancelled first.
    AlreadyCancelled,
}

/// Turns a termination signal into cancellation: the shared token fires as
/// soon as the companion lock is acquired, or when the deadline expires.
pub struct ShutdownCoordinator {
    trigger: ShutdownTrigger,
    lock_path: PathBuf,
    deadline: Duration,
}

impl ShutdownCoordinator {
    pub fn new(trigger: ShutdownTrigger, lock_path: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            trigger,
            lock_path: lock_path.into(),
            deadline,
        }
    }

    /// Waits for a signal and drains; returns `None` when cancellation came
    /// from elsewhere first.
    pub async fn run(self, mut signals: SignalListener) -> Option<DrainOutcome> {
        tokio::select! {
            _ = self.trigger.cancelled() => None,
            name = signals.recv() => {
                info!(event = PcapEvent::Signal.as_str(), signal = name; "signaled: {name}");
                Some(self.drain().await)
            }
        }
    }

    pub async fn drain(&self) -> DrainOutcome {
        self.trigger.begin_drain();
        let deadline = Instant::now() + self.deadline;

        let outcome = tokio::select! {
            biased;
            _ = self.trigger.cancelled() => DrainOutcome::AlreadyCancelled,
            acquired = self.wait_for_lock(deadline) => {
                if acquired { DrainOutcome::LockAcquired } else { DrainOutcome::DeadlineExpired }
            }
            _ = tokio::time::sleep_until(deadline) => DrainOutcome::DeadlineExpired,
        };

        match outcome {
            DrainOutcome::LockAcquired => {
                self.trigger.fire(CancelReason::LockAcquired);
            }
            DrainOutcome::DeadlineExpired => {
                self.trigger.fire(CancelReason::Deadline);
            }
            DrainOutcome::AlreadyCancelled => {}
        }
        outcome
    }

    /// Returns `true` once the lock is acquired. Any failure other than
    /// cancellation waits out the deadline.
    async fn wait_for_lock(&self, deadline: Instant) -> bool {
        let lock = self.lock_path.display();
        info!(event = PcapEvent::Lock.as_str(), lock:% = lock; "waiting for PCAP lock file: {lock}");

        let budget = deadline.saturating_duration_since(Instant::now());
        match acquire_exclusive(&self.lock_path, budget, &self.trigger.token()).await {
            Ok(guard) => {
                info!(event = PcapEvent::Lock.as_str(), lock:% = lock; "acquired PCAP lock file: {lock}");
                drop(guard);
                true
            }
            Err(LockError::Cancelled { .. }) => false,
            Err(e) => {
                warn!(event = PcapEvent::Lock.as_str(), lock:% = lock, error:% = e; "failed to acquire PCAP lock file: {lock}");
                tokio::time::sleep_until(deadline).await;
                false
            }
        }
    }
}
