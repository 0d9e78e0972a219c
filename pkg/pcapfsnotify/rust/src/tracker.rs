// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-stream rotation bookkeeping.
//!
//! The capture process always writes into its most recent segment, so a
//! segment only becomes safe to export once the next one for the same key
//! shows up. The tracker remembers that most recent, not-yet-exported segment
//! ("active") and counts creations per key.
//!
//! State is only ever mutated through an atomic increment of the creation
//! counter and a compare-and-swap of the active segment. The per-key map is a
//! sharded `DashMap`, so a new key never blocks dispatches for other keys. Two dispatches for the
//! same key are allowed to race; the loser of the swap reports a leak and the
//! active pointer is forced to its own segment so the tracker converges.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;

use crate::segment::RotationKey;

#[derive(Debug, Default)]
pub struct RotationState {
    creation_count: AtomicU64,
    active_segment: ArcSwapOption<PathBuf>,
}

impl RotationState {
    fn increment(&self) -> u64 {
        self.creation_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn creation_count(&self) -> u64 {
        self.creation_count.load(Ordering::SeqCst)
    }

    pub fn active_segment(&self) -> Option<PathBuf> {
        self.active_segment.load_full().map(|segment| (*segment).clone())
    }

    fn store(&self, segment: PathBuf) {
        self.active_segment.store(Some(Arc::new(segment)));
    }

    /// Replaces the active segment with `new` only if it still is `current`.
    fn compare_and_swap(&self, current: &Path, new: PathBuf) -> bool {
        let new = Arc::new(new);
        loop {
            let seen = self.active_segment.load();
            if seen.as_deref().map(PathBuf::as_path) != Some(current) {
                return false;
            }
            let previous = self
                .active_segment
                .compare_and_swap(&seen, Some(Arc::clone(&new)));
            if same_slot(&previous, &seen) {
                return true;
            }
            // Replaced by an equal path in between; compare again.
        }
    }
}

fn same_slot(a: &Option<Arc<PathBuf>>, b: &Option<Arc<PathBuf>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Outcome of observing a newly created segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// First segment of the key; recorded as active, nothing to export.
    First,
    /// `previous` was superseded and must be exported.
    Superseded { previous: PathBuf, iteration: u64 },
    /// The key has rotated before but no active segment is recorded. The new
    /// segment becomes active and its predecessor is left to the terminal flush.
    Orphaned { iteration: u64 },
}

impl Rotation {
    pub fn iteration(&self) -> u64 {
        match self {
            Rotation::First => 1,
            Rotation::Superseded { iteration, .. } | Rotation::Orphaned { iteration } => *iteration,
        }
    }
}

#[derive(Debug, Default)]
pub struct RotationTracker {
    states: DashMap<RotationKey, Arc<RotationState>>,
}

impl RotationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, key: &RotationKey) -> Arc<RotationState> {
        if let Some(state) = self.existing(key) {
            return state;
        }
        Arc::clone(self.states.entry(key.clone()).or_default().value())
    }

    fn existing(&self, key: &RotationKey) -> Option<Arc<RotationState>> {
        self.states.get(key).map(|state| Arc::clone(state.value()))
    }

    /// Counts the creation of `segment` and decides what, if anything, must be
    /// exported for it.
    pub fn observe(&self, key: &RotationKey, segment: &Path) -> Rotation {
        let state = self.state(key);
        let iteration = state.increment();

        if iteration == 1 {
            state.store(segment.to_path_buf());
            return Rotation::First;
        }

        match state.active_segment() {
            Some(previous) if !previous.as_os_str().is_empty() => {
                Rotation::Superseded { previous, iteration }
            }
            _ => {
                state.store(segment.to_path_buf());
                Rotation::Orphaned { iteration }
            }
        }
    }

    /// Moves the active pointer of `key` from `previous` to `segment`.
    ///
    /// Returns `false` when another dispatch already moved it (the segment it
    /// recorded is leaked); the pointer is set to `segment` regardless.
    pub fn advance(&self, key: &RotationKey, previous: &Path, segment: &Path) -> bool {
        let state = self.state(key);
        if state.compare_and_swap(previous, segment.to_path_buf()) {
            return true;
        }
        state.store(segment.to_path_buf());
        false
    }

    pub fn active_segment(&self, key: &RotationKey) -> Option<PathBuf> {
        self.existing(key).and_then(|state| state.active_segment())
    }

    pub fn creation_count(&self, key: &RotationKey) -> u64 {
        self.existing(key)
            .map(|state| state.creation_count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drops the active segment of `key`, keeping its creation count.
    #[cfg(test)]
    pub(crate) fn clear(&self, key: &RotationKey) {
        if let Some(state) = self.existing(key) {
            state.active_segment.store(None);
        }
    }
}
