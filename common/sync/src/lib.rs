// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lock types shared by the decode pipeline crates.
//!
//! The pipeline is built with `panic = "abort"` for release, so a thread that panics while
//! holding a lock takes the process down with it and poisoning is never observed. Rather than
//! sprinkling `.lock().unwrap()` over every critical section, the wrapper here turns poisoning
//! into a panic at the single place it can happen.

mod mutex;

pub use crate::mutex::Mutex;
