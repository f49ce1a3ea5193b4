// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for CLI operations with opcat, with clap integration.
//!
//! This library carries the flags and plumbing shared by opcat frontends:
//! logging setup, the termination log, and the image-client options passed
//! through to whatever image source a frontend wires in.

use camino::Utf8PathBuf;
use clap::Args;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use tracing_subscriber::EnvFilter;

/// Flags recognized by every opcat frontend.
#[derive(Args, Clone, Debug)]
pub struct GlobalOptions {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalOptions {
    /// Installs a tracing subscriber writing to stderr.
    ///
    /// `RUST_LOG` overrides the default level; `--debug` raises the default
    /// from `info` to `debug`.
    pub fn init_logging(&self) {
        let default = if self.debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Options for the out-of-core image client. These are recognized and
/// passed through to the image source implementation a frontend selects.
#[derive(Args, Clone, Debug, Default)]
pub struct ImageClientOptions {
    /// Skip TLS certificate verification when talking to image registries
    #[arg(long, global = true)]
    pub skip_tls_verify: bool,

    /// Use plain HTTP when talking to image registries
    #[arg(long, global = true)]
    pub use_http: bool,

    /// Path to a CA bundle for image registry connections
    #[arg(long, global = true, value_name = "PATH")]
    pub ca_file: Option<Utf8PathBuf>,
}

/// Where fatal errors are written before the process exits non-zero, so
/// orchestrators can surface the failure reason.
#[derive(Clone, Debug)]
pub struct TerminationLog {
    path: Option<Utf8PathBuf>,
}

impl TerminationLog {
    /// Creates a termination log at the given path, or a no-op log when
    /// `path` is `None`.
    pub fn new(path: Option<Utf8PathBuf>) -> Self {
        Self { path }
    }

    /// Records a fatal error. Failures to write the log are reported on
    /// stderr but never mask the original error.
    pub fn record(&self, err: &dyn Display) {
        let Some(path) = &self.path else {
            return;
        };
        let result = fs::File::create(path)
            .and_then(|mut file| writeln!(file, "{}", err));
        if let Err(write_err) = result {
            eprintln!("warning: could not write termination log {}: {}", path, write_err);
        }
    }
}
