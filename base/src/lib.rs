// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-level helpers shared by the decode pipeline: time, logging setup and worker threads.

pub mod clock;
pub mod syslog;
mod worker_thread;

pub use clock::Clock;
pub use clock::FakeClock;
pub use clock::SystemClock;
pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;
pub use worker_thread::StopSignal;
pub use worker_thread::WorkerThread;
