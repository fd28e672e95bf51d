// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::{msg::model::valid_callsign, relay::queue::QUEUED_MSG_MAX_BYTES};

/// Port used for `listen` entries that do not name one. May be
/// overridden from the command line.
pub const DEFAULT_PORT: u16 = 17622;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Permitted ATC station callsigns. Empty means the built-in test
    /// registry (`TEST`).
    #[serde(default)]
    pub atc: Vec<String>,

    /// `host` or `host:port` endpoints to listen on. Empty means
    /// `localhost` on the default port.
    #[serde(default)]
    pub listen: Vec<String>,

    #[serde(default)]
    pub tls: TlsConfig,

    /// Path to the reloadable peer-address blocklist.
    #[serde(default)]
    pub blocklist: Option<PathBuf>,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logger: LogConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TlsConfig {
    /// Server private key (PEM).
    #[serde(default = "dfl_keyfile")]
    pub keyfile: PathBuf,
    /// Server certificate (PEM).
    #[serde(default = "dfl_certfile")]
    pub certfile: PathBuf,
    /// Optional CA trust store (PEM); reserved for client auth.
    #[serde(default)]
    pub cafile: Option<PathBuf>,
}

fn dfl_keyfile() -> PathBuf {
    PathBuf::from("cpdlcd_key.pem")
}

fn dfl_certfile() -> PathBuf {
    PathBuf::from("cpdlcd_cert.pem")
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            keyfile: dfl_keyfile(),
            certfile: dfl_certfile(),
            cafile: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QueueConfig {
    /// Cap on the accounted size of the store-and-forward queue.
    #[serde(default = "dfl_queue_max_bytes")]
    pub max_bytes: u64,
}

fn dfl_queue_max_bytes() -> u64 {
    QUEUED_MSG_MAX_BYTES
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_bytes: dfl_queue_max_bytes(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    /// Log filter, `EnvFilter` syntax (e.g. `info`, `cpdlc_relay_rs=debug`).
    #[serde(default = "dfl_log_level")]
    pub level: String,
    #[serde(default = "dfl_log_output")]
    pub output: LogOutput,
    /// Log file path, required for `output: file`.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn dfl_log_level() -> String {
    "info".to_string()
}

fn dfl_log_output() -> LogOutput {
    LogOutput::Stderr
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: dfl_log_level(),
            output: dfl_log_output(),
            file: None,
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P, default_port: u16) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize(default_port)?;
        Ok(cfg)
    }

    /// The configuration used when no file is given: the `TEST` ATC
    /// station on a localhost listener.
    pub fn auto(default_port: u16) -> Self {
        let mut cfg = Config::default();
        cfg.validate_and_normalize(default_port)
            .expect("built-in configuration is valid");
        cfg
    }

    /// Validates invariants and fills in defaulted sections.
    pub fn validate_and_normalize(&mut self, default_port: u16) -> Result<()> {
        if self.atc.is_empty() {
            self.atc.push("TEST".to_string());
        }
        let mut seen = HashSet::new();
        for callsign in &self.atc {
            ensure!(
                valid_callsign(callsign),
                "invalid ATC callsign {callsign:?}"
            );
            ensure!(seen.insert(callsign), "duplicate ATC entry {callsign}");
        }

        if self.listen.is_empty() {
            self.listen.push("localhost".to_string());
        }
        let mut endpoints = HashSet::new();
        for entry in &self.listen {
            let ep = parse_listen(entry, default_port)?;
            ensure!(
                endpoints.insert(ep),
                "invalid listen directive {entry:?}: address already used on another socket"
            );
        }

        ensure!(self.queue.max_bytes >= 1, "queue.max_bytes must be >= 1");
        if matches!(self.logger.output, LogOutput::File) {
            ensure!(
                self.logger.file.is_some(),
                "logger.file is required for output: file"
            );
        }

        Ok(())
    }

    /// The resolved `(host, port)` pairs to bind.
    pub fn listen_endpoints(&self, default_port: u16) -> Result<Vec<(String, u16)>> {
        self.listen
            .iter()
            .map(|entry| parse_listen(entry, default_port))
            .collect()
    }
}

/// Splits a `host[:port]` listen directive. IPv6 literals keep their
/// brackets in the host part.
fn parse_listen(entry: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = match entry.rsplit_once(':') {
        // A second colon means a bare IPv6 literal, not a port.
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port: u16 = match port.parse() {
                Ok(p) if p > 0 => p,
                _ => bail!(
                    "invalid listen directive {entry:?}: expected valid port number \
                     after ':' character"
                ),
            };
            (host.to_string(), port)
        },
        _ => (entry.to_string(), default_port),
    };
    ensure!(
        !host.is_empty(),
        "invalid listen directive {entry:?}: empty host"
    );
    Ok((host, port))
}
