// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;
use std::time::Duration;

use base::info;
use base::Clock;
use base::SystemClock;
use base::WorkerThread;

use crate::backend::Codec;
use crate::backend::DecoderBackend;
use crate::backend::EngineCallbacks;
use crate::backend::EngineConfig;
use crate::command;
use crate::command::Command;
use crate::command::CommandSender;
use crate::consumer::ConsumerLoop;
use crate::consumer::LoopStats;
use crate::controller::PipelineController;
use crate::controller::PipelineStats;
use crate::error::Error;
use crate::error::Result;
use crate::params::PipelineParams;
use crate::sink::PictureSink;

/// A decode pipeline and the consumer thread driving it.
///
/// The consumer starts paused: call `run()` to start decoding. Data submitted before that is
/// buffered, up to the ring buffer's capacity.
pub struct Pipeline {
    controller: Arc<PipelineController>,
    commands: CommandSender,
    worker: Option<WorkerThread<LoopStats>>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn start<B, S>(
        backend: &mut B,
        codec: Codec,
        params: PipelineParams,
        sink: S,
    ) -> Result<Self>
    where
        B: DecoderBackend,
        S: PictureSink + 'static,
    {
        Self::start_with_clock(backend, codec, params, sink, Arc::new(SystemClock::new()))
    }

    /// Like `start()`, with every poll of the pipeline going through `clock`.
    pub fn start_with_clock<B, S>(
        backend: &mut B,
        codec: Codec,
        params: PipelineParams,
        sink: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        B: DecoderBackend,
        S: PictureSink + 'static,
    {
        let config = EngineConfig {
            codec,
            max_decode_surfaces: params.max_decode_surfaces,
        };
        let controller = Arc::new(PipelineController::new(
            params,
            Box::new(sink),
            clock.clone(),
        )?);
        let engine = backend.initialize(&config, controller.clone() as Arc<dyn EngineCallbacks>)?;

        let (commands, receiver) = command::channel();
        let consumer = ConsumerLoop::new(controller.clone(), engine, receiver, clock.clone());
        let worker = WorkerThread::start("v_hwdec_consumer", move |stop| consumer.run(stop))
            .map_err(Error::SpawnWorker)?;
        info!("{} pipeline started", codec);

        Ok(Pipeline {
            controller,
            commands,
            worker: Some(worker),
            clock,
        })
    }

    pub fn controller(&self) -> &Arc<PipelineController> {
        &self.controller
    }

    pub fn stats(&self) -> PipelineStats {
        self.controller.stats()
    }

    /// Queues compressed bytes, blocking while the buffer is full. Returns whether they were
    /// accepted.
    pub fn submit(&self, data: &[u8]) -> bool {
        self.controller.submit(data)
    }

    pub fn notify_end_of_stream(&self) {
        self.controller.begin_end_of_stream();
    }

    pub fn notify_flush_begin(&self) {
        self.controller.begin_flush();
    }

    pub fn notify_flush_end(&self) {
        self.controller.end_flush();
    }

    /// Starts or resumes decoding.
    pub fn run(&self) -> Result<()> {
        self.commands.send(Command::Run)
    }

    /// Discards pending data and stops decoding until the next `run()`.
    pub fn pause(&self) -> Result<()> {
        self.controller.flush_all_pending();
        self.commands.send(Command::Pause)
    }

    /// Returns to a fresh stream: pending data is discarded and the end-of-stream latches are
    /// cleared.
    pub fn restart(&self) {
        self.controller.flush_all_pending();
        self.controller.restart();
    }

    /// Waits until end of stream has been delivered to the sink, or `timeout` elapses according to
    /// the pipeline's clock. Returns whether end of stream was delivered.
    pub fn wait_for_end_of_stream(&self, timeout: Duration) -> bool {
        let start = self.clock.now();
        let poll = self.controller.params().idle_poll();
        loop {
            if self.controller.eos_delivered() {
                return true;
            }
            if self.clock.now().saturating_duration_since(start) >= timeout {
                return false;
            }
            self.clock.sleep(poll);
        }
    }

    /// Discards pending data and stops the consumer thread. Returns its statistics.
    pub fn stop(mut self) -> Result<LoopStats> {
        self.controller.flush_all_pending();
        let sent = self.commands.send(Command::Stop);
        let stats = match self.worker.take() {
            Some(worker) => worker.stop(),
            None => return Err(Error::WorkerGone),
        };
        sent?;
        Ok(stats)
    }
}
