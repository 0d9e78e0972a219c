// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;

use crate::memory::{CGROUP_V1_MEMORY_USAGE, CGROUP_V2_MEMORY_CURRENT};
use crate::mover::RetryPolicy;

pub const DEFAULT_LOCK_FILE: &str = "/var/lock/pcap.lock";

/// Runtime the sidecar is deployed next to. Selects which cgroup memory
/// counter is sampled by the memory relief loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuntimeEnv {
    Run,
    Gae,
    Gke,
}

impl RuntimeEnv {
    pub fn memory_usage_path(self) -> &'static Path {
        match self {
            RuntimeEnv::Gae => Path::new(CGROUP_V2_MEMORY_CURRENT),
            RuntimeEnv::Run | RuntimeEnv::Gke => Path::new(CGROUP_V1_MEMORY_USAGE),
        }
    }
}

/// Exports rotated packet capture segments into a mounted bucket.
#[derive(Parser, Debug, Clone)]
#[command(name = "dd-pcap-fsnotify", version)]
pub struct Args {
    /// Directory the capture process writes segments into
    #[arg(long = "src_dir", env = "PCAP_SRC_DIR", default_value = "/pcap-tmp")]
    pub src_dir: PathBuf,

    /// Destination directory (mounted object store)
    #[arg(long = "gcs_dir", env = "PCAP_GCS_DIR", default_value = "/pcap")]
    pub gcs_dir: PathBuf,

    /// Comma-separated list of segment file extensions
    #[arg(long = "pcap_ext", env = "PCAP_EXT", default_value = "pcap")]
    pub pcap_ext: String,

    /// Compress exported segments
    #[arg(long, env = "PCAP_GZIP")]
    pub gzip: bool,

    /// Delete segments from the source directory once exported
    #[arg(long, env = "PCAP_DELETE", default_value_t = true, action = ArgAction::Set)]
    pub delete: bool,

    /// Execution environment
    #[arg(long, env = "PCAP_ENV", value_enum, default_value = "run")]
    pub env: RuntimeEnv,

    /// Shorthand for `--env gae`
    #[arg(long, env = "PCAP_GAE")]
    pub gae: bool,

    /// Seconds after which the capture process rotates segments
    #[arg(long, env = "PCAP_ROTATE_SECS", default_value_t = 60)]
    pub interval: u64,

    /// Attempts for a failed copy into the destination
    #[arg(long = "retries_max", env = "PCAP_RETRIES_MAX", default_value_t = 5)]
    pub retries_max: u32,

    /// Seconds between copy attempts
    #[arg(long = "retries_delay", env = "PCAP_RETRIES_DELAY", default_value_t = 2)]
    pub retries_delay: u64,

    /// Lock held by the capture supervisor while any capture engine runs
    #[arg(long = "lock_file", env = "PCAP_LOCK_FILE", default_value = DEFAULT_LOCK_FILE)]
    pub lock_file: PathBuf,

    /// Seconds between a termination signal and forced cancellation
    #[arg(long, env = "PCAP_DRAIN_DEADLINE", default_value_t = 3)]
    pub deadline: u64,

    /// Enable debug logs
    #[arg(long, env = "PCAP_DEBUG")]
    pub debug: bool,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub src_dir: PathBuf,
    pub dst_dir: PathBuf,
    pub extensions: Vec<String>,
    pub compress: bool,
    pub delete: bool,
    pub runtime: RuntimeEnv,
    /// Rotation interval of the capture process; also paces memory relief.
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub lock_file: PathBuf,
    pub drain_deadline: Duration,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        let extensions = parse_extensions(&args.pcap_ext);
        if extensions.is_empty() {
            bail!("no segment extension configured: '{}'", args.pcap_ext);
        }
        if args.interval == 0 {
            bail!("rotation interval must be greater than zero");
        }
        if args.retries_max == 0 {
            bail!("retries_max must be at least 1");
        }
        let runtime = if args.gae { RuntimeEnv::Gae } else { args.env };

        Ok(Config {
            src_dir: args.src_dir,
            dst_dir: args.gcs_dir,
            extensions,
            compress: args.gzip,
            delete: args.delete,
            runtime,
            interval: Duration::from_secs(args.interval),
            retry: RetryPolicy {
                max_attempts: args.retries_max,
                delay: Duration::from_secs(args.retries_delay),
            },
            lock_file: args.lock_file,
            drain_deadline: Duration::from_secs(args.deadline),
        })
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.'))
        .filter(|ext| !ext.is_empty())
        .map(String::from)
        .collect()
}

/// Deployment identity stamped on every log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployment {
    pub sidecar: String,
    pub module: String,
    pub tags: Vec<String>,
}

impl Deployment {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Deployment {
            sidecar: var("APP_SIDECAR"),
            module: var("PROC_NAME"),
            tags: [
                "PROJECT_ID",
                "APP_SERVICE",
                "GCP_REGION",
                "APP_VERSION",
                "INSTANCE_ID",
            ]
            .iter()
            .map(|name| var(name))
            .collect(),
        }
    }
}
