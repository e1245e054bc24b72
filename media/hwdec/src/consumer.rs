// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decode/delivery thread's run loop.

use std::sync::Arc;

use base::debug;
use base::info;
use base::Clock;
use base::StopSignal;
use serde::Serialize;

use crate::backend::DecodeEngine;
use crate::command::Command;
use crate::command::CommandReceiver;
use crate::controller::PipelineController;

/// Counters kept by the consumer thread, returned when it exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub bytes_read: u64,
    pub units_decoded: u64,
    pub decode_errors: u64,
    pub engine_resets: u64,
    /// Chunks read before a flush and dropped without being decoded.
    pub stale_chunks: u64,
    pub idle_polls: u64,
    pub streams_completed: u64,
}

/// Pulls compressed data out of the controller's ring buffer and feeds it to the engine.
///
/// This is the only caller of the engine.
pub struct ConsumerLoop<E: DecodeEngine> {
    controller: Arc<PipelineController>,
    engine: E,
    commands: CommandReceiver,
    clock: Arc<dyn Clock>,
    chunk: Vec<u8>,
    paused: bool,
    /// Set when end of stream arrived with nothing left to decode; cleared by the next flush.
    stream_ended: bool,
    generation: u64,
    stats: LoopStats,
}

impl<E: DecodeEngine> ConsumerLoop<E> {
    pub(crate) fn new(
        controller: Arc<PipelineController>,
        engine: E,
        commands: CommandReceiver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let chunk = vec![0u8; controller.params().chunk_size];
        let generation = controller.flush_generation();
        ConsumerLoop {
            controller,
            engine,
            commands,
            clock,
            chunk,
            paused: true,
            stream_ended: false,
            generation,
            stats: Default::default(),
        }
    }

    /// Runs until a `Stop` command is received or `stop` is signaled.
    pub fn run(mut self, stop: StopSignal) -> LoopStats {
        debug!("consumer loop started");
        loop {
            if let Some(request) = self.commands.try_recv() {
                let command = request.command;
                match command {
                    Command::Run => self.paused = false,
                    Command::Pause => self.paused = true,
                    Command::Stop => {}
                }
                request.reply();
                if command == Command::Stop {
                    break;
                }
            }
            if stop.is_signaled() {
                break;
            }

            self.sync_generation();
            if self.paused {
                self.idle();
            } else {
                self.step();
            }
        }
        info!("consumer loop exiting: {:?}", self.stats);
        self.stats
    }

    /// Resets the engine if the controller flushed since the last iteration.
    fn sync_generation(&mut self) {
        let generation = self.controller.flush_generation();
        if generation == self.generation {
            return;
        }
        self.generation = generation;
        self.stream_ended = false;
        self.stats.engine_resets += 1;
        if let Err(e) = self.engine.reset() {
            self.controller.report_engine_error(&e);
            // Don't reset again for the fault this just raised.
            self.generation = self.controller.flush_generation();
        }
        self.controller.set_engine_generation(self.generation);
    }

    fn idle(&mut self) {
        self.stats.idle_polls += 1;
        self.clock.sleep(self.controller.params().idle_poll());
    }

    fn step(&mut self) {
        if self.controller.take_drain_request() {
            self.stream_ended = true;
        }

        let ring = self.controller.ring();
        if self.controller.is_flushing() || ring.is_empty() || self.stream_ended {
            if !self.finish_stream() {
                self.idle();
            }
            return;
        }

        // Takes min(chunk size, available) bytes. The buffer may have been flushed since the
        // emptiness check, in which case nothing is read.
        let len = match ring.read_some(&mut self.chunk) {
            Ok(0) => return,
            Ok(len) => len,
            Err(e) => {
                debug!("read interrupted: {}", e);
                return;
            }
        };
        self.stats.bytes_read += len as u64;

        if self.controller.flush_generation() != self.generation {
            // The ring buffer was flushed after this chunk was read.
            self.stats.stale_chunks += 1;
            return;
        }
        match self.engine.decode(&self.chunk[..len]) {
            Ok(()) => self.stats.units_decoded += 1,
            Err(e) => {
                self.stats.decode_errors += 1;
                self.controller.report_engine_error(&e);
            }
        }
    }

    /// Drains the engine and delivers end of stream if it is due. Returns whether it was.
    fn finish_stream(&mut self) -> bool {
        if !self.controller.eos_pending() {
            return false;
        }
        // A failed engine has nothing left to emit.
        if !self.controller.is_faulted() {
            if let Err(e) = self.engine.flush_to_end() {
                self.stats.decode_errors += 1;
                self.controller.report_engine_error(&e);
            }
        }
        if self.controller.end_end_of_stream() {
            self.stats.streams_completed += 1;
        }
        true
    }
}
