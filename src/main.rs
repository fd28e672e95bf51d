// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use clap::Parser;
use cpdlc_relay_rs::{
    cfg::{
        cli::{Args, resolve_config_path},
        config::{Config, DEFAULT_PORT},
        logger::init_logger,
    },
    relay::Relay,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_port = args.port.unwrap_or(DEFAULT_PORT);

    let cfg = match &args.config {
        Some(path) => resolve_config_path(path)
            .and_then(|p| Config::load_from_file(p, default_port))
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::auto(default_port),
    };

    let _logger_guard = init_logger(&cfg.logger)?;

    let relay = Relay::bind(&cfg, default_port)
        .await
        .context("relay startup failed")?;
    let cancel = relay.cancel_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    relay.run().await
}
