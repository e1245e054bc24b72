// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Installs the process-wide logger.
//!
//! Library crates only emit records through the `log` macros re-exported from `base`; binaries
//! call `syslog::init()` (or `init_with()`) once at startup. `RUST_LOG` takes precedence over the
//! configured filter.
//!
//! # Examples
//!
//! ```
//! use base::syslog;
//! use base::warn;
//!
//! if let Err(e) = syslog::init() {
//!     println!("failed to initialize logging: {}", e);
//!     return;
//! }
//! warn!("this is your {} warning", "final");
//! ```

use thiserror::Error as ThisError;

/// Logger settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// `env_logger` filter directives, e.g. `info` or `hwdec=debug,warn`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: String::from("info"),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("a logger is already installed: {0}")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// Installs a stderr logger with the default `info` filter.
pub fn init() -> Result<(), Error> {
    init_with(LogConfig::default())
}

/// Installs a stderr logger using `cfg`.
pub fn init_with(cfg: LogConfig) -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cfg.filter))
        .target(env_logger::Target::Stderr)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails() {
        // Another test in this binary may have installed the logger already.
        let _ = init();
        assert!(matches!(init(), Err(Error::AlreadyInitialized(_))));
    }
}
