// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error as ThisError;

use crate::backend::EngineError;

/// Errors surfaced to whoever sets up or tears down a pipeline.
#[sorted]
#[derive(Debug, ThisError)]
pub enum Error {
    /// Backing storage for the ring buffer or the reorder slots could not be allocated.
    #[error("failed to allocate {what} ({size} entries)")]
    AllocationFailed { what: &'static str, size: usize },
    #[error("decode engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("invalid pipeline parameters: {0}")]
    InvalidParams(String),
    #[error("failed to spawn consumer thread: {0}")]
    SpawnWorker(std::io::Error),
    /// The consumer thread exited before acknowledging a command.
    #[error("consumer thread is gone")]
    WorkerGone,
}

pub type Result<T> = std::result::Result<T, Error>;
