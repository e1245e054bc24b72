// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Time source used by every polling loop in the pipeline. Production code sleeps on the system
//! clock; tests substitute a `FakeClock` whose sleeps only move a counter forward.

use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

/// A source of time that polling loops can also use to wait.
pub trait Clock: Debug + Send + Sync {
    /// Returns the current time according to this clock.
    fn now(&self) -> Instant;

    /// Waits for `duration` according to this clock.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A fake clock that gives tests exact control over the time.
///
/// `sleep()` never blocks: it advances the clock by the requested amount and yields the thread so
/// that whoever the sleeper is waiting on gets a chance to run.
#[derive(Debug)]
pub struct FakeClock {
    epoch: Instant,
    ns_since_epoch: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        FakeClock {
            epoch: Instant::now(),
            ns_since_epoch: AtomicU64::new(0),
        }
    }

    /// Get the current time in ns, according to this clock.
    pub fn nanos(&self) -> u64 {
        self.ns_since_epoch.load(Ordering::Acquire)
    }

    pub fn add_ns(&self, ns: u64) {
        self.ns_since_epoch.fetch_add(ns, Ordering::AcqRel);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.nanos())
    }

    fn sleep(&self, duration: Duration) {
        self.add_ns(duration.as_nanos().try_into().unwrap_or(u64::MAX));
        thread::yield_now();
    }
}
