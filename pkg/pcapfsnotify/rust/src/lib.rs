// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! PCAP export sidecar.
//!
//! Watches the directory a capture process rotates segment files into and
//! exports every superseded segment into a mounted bucket. On shutdown
//! (termination signal or capture sentinel) the remaining segments are flushed
//! within a bounded deadline.

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod export;
pub mod flush;
pub mod lock;
pub mod memory;
pub mod mover;
pub mod segment;
pub mod shutdown;
pub mod sidecar;
#[cfg(test)]
mod testlog;
pub mod tracker;
pub mod watcher;

pub use config::{Args, Config, Deployment, RuntimeEnv};
pub use sidecar::Sidecar;
