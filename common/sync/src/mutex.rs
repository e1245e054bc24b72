// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fmt::Debug;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;

static MUTEX_POISONED: &str = "mutex is poisoned";

/// A mutual exclusion lock whose `lock()` panics on poison instead of returning an error.
pub struct Mutex<T: ?Sized> {
    std: StdMutex<T>,
}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex holding `value`.
    pub const fn new(value: T) -> Mutex<T> {
        Mutex {
            std: StdMutex::new(value),
        }
    }

    /// Consumes the mutex and returns the protected value.
    pub fn into_inner(self) -> T {
        self.std.into_inner().expect(MUTEX_POISONED)
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks until the lock is acquired and returns the guard.
    pub fn lock(&self) -> MutexGuard<T> {
        self.std.lock().expect(MUTEX_POISONED)
    }

    /// Returns a mutable reference to the protected value; the exclusive borrow makes locking
    /// unnecessary.
    pub fn get_mut(&mut self) -> &mut T {
        self.std.get_mut().expect(MUTEX_POISONED)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T: ?Sized + Debug> Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.std, f)
    }
}
