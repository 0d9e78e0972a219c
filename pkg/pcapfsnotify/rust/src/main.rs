// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_pcap_fsnotify::events::PcapEvent;
use dd_pcap_fsnotify::{Args, Config, Deployment, Sidecar};
use log::{error, info};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let deployment = Deployment::from_env();

    dd_agent_log::Builder::new()
        .level(dd_agent_log::level_from_env("DD_LOG_LEVEL", args.log_level()))
        .static_field("sidecar", deployment.sidecar)
        .static_field("module", deployment.module)
        .static_field("tags", json!(deployment.tags))
        .init()
        .context("failed to initialize logging")?;

    info!(
        "dd-pcap-fsnotify starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let config = match Config::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            error!(event = PcapEvent::Init.as_str(), error:% = e; "invalid configuration: {e:#}");
            return Err(e);
        }
    };

    if let Err(e) = Sidecar::new(config).run().await {
        error!(event = PcapEvent::Init.as_str(), error:% = e; "failed to start PCAP export sidecar: {e:#}");
        return Err(e);
    }
    Ok(())
}
