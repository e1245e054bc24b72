// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Worker thread abstraction

use std::io;
use std::panic;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::thread::Thread;

/// Flag polled by a worker thread to learn that it has been asked to stop.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Wrapper object for creating a worker thread that can be stopped through a `StopSignal`.
pub struct WorkerThread<T: Send + 'static> {
    worker: Option<(StopSignal, JoinHandle<T>)>,
}

impl<T: Send + 'static> WorkerThread<T> {
    /// Starts a worker thread named `thread_name` running the `thread_func` function.
    ///
    /// The `thread_func` implementation must poll the provided `StopSignal` and return from the
    /// thread once it is signaled.
    ///
    /// Call [`stop()`](Self::stop) to stop the thread.
    pub fn start<F>(thread_name: impl Into<String>, thread_func: F) -> io::Result<Self>
    where
        F: FnOnce(StopSignal) -> T + Send + 'static,
    {
        let stop_signal = StopSignal::new();
        let thread_stop_signal = stop_signal.clone();

        let thread_handle = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || thread_func(thread_stop_signal))?;

        Ok(WorkerThread {
            worker: Some((stop_signal, thread_handle)),
        })
    }

    /// Stops the worker thread.
    ///
    /// Returns the value returned by the function running in the thread.
    pub fn stop(mut self) -> T {
        // The only time the internal `Option` should be `None` is in a `drop` after `stop`, so this
        // `expect()` should never fail.
        self.stop_internal().expect("invalid worker state")
    }

    // `stop_internal` accepts a reference so it can be called from `drop`.
    #[doc(hidden)]
    fn stop_internal(&mut self) -> Option<T> {
        self.worker.take().map(|(stop_signal, thread_handle)| {
            stop_signal.signal();

            match thread_handle.join() {
                Ok(v) => v,
                Err(e) => panic::resume_unwind(e),
            }
        })
    }

    /// Signal the thread's stop flag without joining it. Calling `stop` or `drop` afterwards
    /// signals again and joins the thread.
    pub fn signal(&self) {
        if let Some((stop_signal, _)) = &self.worker {
            stop_signal.signal();
        }
    }

    /// Returns a handle to the running thread.
    pub fn thread(&self) -> Option<&Thread> {
        self.worker.as_ref().map(|(_, handle)| handle.thread())
    }
}

impl<T: Send + 'static> Drop for WorkerThread<T> {
    /// Stops the thread if the `WorkerThread` is dropped without calling [`stop()`](Self::stop).
    fn drop(&mut self) {
        let _ = self.stop_internal();
    }
}
