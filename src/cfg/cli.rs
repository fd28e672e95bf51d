// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

/// CPDLC store-and-forward relay daemon.
#[derive(Parser, Debug)]
#[command(name = "cpdlcd", version, about)]
pub struct Args {
    /// Path to the configuration file. Without one, a built-in test
    /// configuration is used (ATC "TEST", localhost listener).
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Run in the foreground. Daemonisation is left to the service
    /// manager; the flag is accepted for command-line compatibility.
    #[arg(short = 'd', long = "foreground")]
    pub foreground: bool,

    /// Override the default listen port.
    #[arg(short = 'p', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,
}

/// Canonicalizes a config path from the command line, resolving
/// relative paths against the current working directory.
pub fn resolve_config_path<P: AsRef<Path>>(rel: P) -> Result<PathBuf> {
    let rel = rel.as_ref();

    let abs = if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(rel)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}
