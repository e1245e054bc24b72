// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Flush and end-of-stream sequencing for one pipeline.
//!
//! The controller owns the ring buffer, the reorder queue and the sink. Two locks protect its
//! state:
//!
//! - `delivery` covers the reorder queue, the sink and the end-of-stream delivery latch. Engine
//!   callbacks and the end-of-stream drain all go through it, whichever thread they run on.
//! - `control` covers the stream state. It is a leaf lock: it may be taken while `delivery` is
//!   held, never the other way around.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use base::debug;
use base::error;
use base::info;
use base::warn;
use base::Clock;
use serde::Serialize;
use sync::Mutex;

use crate::backend::DecodedPicture;
use crate::backend::EngineCallbacks;
use crate::backend::EngineError;
use crate::backend::StreamFormat;
use crate::backend::SurfaceIndex;
use crate::error::Result;
use crate::params::PipelineParams;
use crate::reorder::ReorderQueue;
use crate::ring_buffer::RingBuffer;
use crate::sink::OutputSample;
use crate::sink::PictureSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    /// Data is accepted and decoded.
    Flowing,
    /// Data is rejected and discarded until the flush ends.
    Flushing,
    /// End of stream was received; remaining data is decoded and drained to the sink.
    Draining,
}

struct ControlState {
    stream: StreamState,
    eos_received: bool,
    /// Set by a fatal engine error. Cleared by the next flush or restart.
    faulted: bool,
    /// Incremented on every flush, fault and restart so the consumer knows to reset the engine.
    flush_generation: u64,
    /// Generation the engine was last reset for. Pictures it reports while this lags
    /// `flush_generation` come from data queued before a flush.
    engine_generation: u64,
    /// End of stream arrived with nothing left to decode; the engine can be drained right away.
    drain_requested: bool,
}

impl ControlState {
    /// Whether received end of stream may go out. A fault does not hold it back; a flush does.
    fn eos_deliverable(&self) -> bool {
        self.eos_received && (self.stream != StreamState::Flushing || self.faulted)
    }
}

struct Outlet {
    sink: Box<dyn PictureSink>,
    format: Option<StreamFormat>,
    samples_sent: u64,
    eos_delivered: bool,
}

struct DeliveryState {
    reorder: ReorderQueue<DecodedPicture>,
    outlet: Outlet,
}

#[derive(Default)]
struct Counters {
    bytes_accepted: AtomicU64,
    writes_rejected: AtomicU64,
    pictures_delivered: AtomicU64,
    pictures_discarded: AtomicU64,
    forced_evictions: AtomicU64,
    delivery_failures: AtomicU64,
    decode_failures: AtomicU64,
    format_changes: AtomicU64,
    eos_delivered: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Snapshot of a pipeline's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub bytes_accepted: u64,
    pub writes_rejected: u64,
    pub pictures_delivered: u64,
    /// Pictures dropped by a flush, a fault, or because they arrived after end of stream.
    pub pictures_discarded: u64,
    /// Pictures emitted before their reorder delay elapsed because their surface was needed.
    pub forced_evictions: u64,
    pub delivery_failures: u64,
    pub decode_failures: u64,
    pub format_changes: u64,
    pub eos_delivered: u64,
}

pub struct PipelineController {
    params: PipelineParams,
    ring: RingBuffer,
    control: Mutex<ControlState>,
    delivery: Mutex<DeliveryState>,
    counters: Counters,
}

impl PipelineController {
    pub fn new(
        params: PipelineParams,
        sink: Box<dyn PictureSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        params.validate()?;
        let ring = RingBuffer::new(&params, clock)?;
        let reorder = ReorderQueue::new(params.reorder_depth)?;

        Ok(PipelineController {
            params,
            ring,
            control: Mutex::new(ControlState {
                stream: StreamState::Flowing,
                eos_received: false,
                faulted: false,
                flush_generation: 0,
                engine_generation: 0,
                drain_requested: false,
            }),
            delivery: Mutex::new(DeliveryState {
                reorder,
                outlet: Outlet {
                    sink,
                    format: None,
                    samples_sent: 0,
                    eos_delivered: false,
                },
            }),
            counters: Default::default(),
        })
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn state(&self) -> StreamState {
        self.control.lock().stream
    }

    pub fn is_flushing(&self) -> bool {
        self.state() == StreamState::Flushing
    }

    pub fn is_faulted(&self) -> bool {
        self.control.lock().faulted
    }

    pub fn eos_received(&self) -> bool {
        self.control.lock().eos_received
    }

    pub fn eos_delivered(&self) -> bool {
        self.delivery.lock().outlet.eos_delivered
    }

    /// Whether end of stream was received but not delivered yet, outside of a flush.
    pub fn eos_pending(&self) -> bool {
        let delivery = self.delivery.lock();
        let control = self.control.lock();
        control.eos_deliverable() && !delivery.outlet.eos_delivered
    }

    pub fn flush_generation(&self) -> u64 {
        self.control.lock().flush_generation
    }

    /// Records that the engine was reset for `generation`. Pictures are only accepted while this
    /// matches the current flush generation.
    pub(crate) fn set_engine_generation(&self, generation: u64) {
        self.control.lock().engine_generation = generation;
    }

    /// Returns and clears the immediate drain request raised by `begin_end_of_stream()`.
    pub fn take_drain_request(&self) -> bool {
        std::mem::take(&mut self.control.lock().drain_requested)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PipelineStats {
            bytes_accepted: get(&c.bytes_accepted),
            writes_rejected: get(&c.writes_rejected),
            pictures_delivered: get(&c.pictures_delivered),
            pictures_discarded: get(&c.pictures_discarded),
            forced_evictions: get(&c.forced_evictions),
            delivery_failures: get(&c.delivery_failures),
            decode_failures: get(&c.decode_failures),
            format_changes: get(&c.format_changes),
            eos_delivered: get(&c.eos_delivered),
        }
    }

    /// Queues compressed bytes for decoding, blocking while the ring buffer is full.
    ///
    /// Returns `false` if the data was rejected because of a flush or fault, or because it can
    /// never fit the buffer.
    pub fn submit(&self, data: &[u8]) -> bool {
        match self.ring.write(data) {
            Ok(()) => {
                bump(&self.counters.bytes_accepted, data.len() as u64);
                true
            }
            Err(e) => {
                debug!("rejected {} input bytes: {}", data.len(), e);
                bump(&self.counters.writes_rejected, 1);
                false
            }
        }
    }

    /// Enters the Flushing state: queued data and pending pictures are discarded, and writes are
    /// rejected until `end_flush()`.
    pub fn begin_flush(&self) {
        debug!("begin flush");
        // A flush supersedes a fault: end of stream waits for the flush to end.
        self.control.lock().faulted = false;
        self.halt();
        self.discard_pending(true);
    }

    /// Leaves the Flushing state. The next data starts a new stream segment.
    pub fn end_flush(&self) {
        let mut delivery = self.delivery.lock();
        {
            let mut control = self.control.lock();
            if control.stream != StreamState::Flushing {
                debug!("end of flush without a flush in progress");
            }
            control.stream = StreamState::Flowing;
            control.eos_received = false;
            control.faulted = false;
        }
        self.ring.end_flush();
        delivery.outlet.eos_delivered = false;
        delivery.outlet.sink.end_flush();
        debug!("end flush");
    }

    /// Flush cycle used when pausing or stopping the pipeline.
    pub fn flush_all_pending(&self) {
        self.begin_flush();
        self.end_flush();
    }

    /// Marks the end of the stream. Repeated calls are ignored until the next flush or restart.
    ///
    /// End of stream is ignored during a flush. After a fatal engine error it is still recorded,
    /// and delivered without any further pictures.
    pub fn begin_end_of_stream(&self) {
        let delivery = self.delivery.lock();
        let mut control = self.control.lock();
        if control.eos_received {
            debug!("ignoring repeated end of stream");
            return;
        }
        if control.faulted {
            control.eos_received = true;
            control.drain_requested = true;
            info!("end of stream received after engine failure");
            return;
        }
        if control.stream == StreamState::Flushing {
            debug!("ignoring end of stream received while flushing");
            return;
        }
        control.eos_received = true;
        control.stream = StreamState::Draining;
        if delivery.reorder.is_empty() && self.ring.is_empty() {
            control.drain_requested = true;
        }
        info!("end of stream received");
    }

    /// Drains the reorder queue to the sink and delivers end of stream. Called once the engine has
    /// emitted all of its pictures.
    ///
    /// Returns whether end of stream was delivered by this call.
    pub fn end_end_of_stream(&self) -> bool {
        let mut delivery = self.delivery.lock();
        if !self.control.lock().eos_deliverable() {
            return false;
        }
        if delivery.outlet.eos_delivered {
            return false;
        }

        let DeliveryState { reorder, outlet } = &mut *delivery;
        reorder.drain(|picture| self.deliver(outlet, picture));
        if !outlet.eos_delivered {
            self.deliver_end_of_stream(outlet);
        }
        true
    }

    /// Returns to the initial Flowing state, as when streaming (re)starts.
    pub fn restart(&self) {
        let mut delivery = self.delivery.lock();
        let discarded = delivery.reorder.discard();
        bump(&self.counters.pictures_discarded, discarded as u64);
        {
            let mut control = self.control.lock();
            control.stream = StreamState::Flowing;
            control.eos_received = false;
            control.faulted = false;
            control.drain_requested = false;
            control.flush_generation += 1;
        }
        self.ring.end_flush();
        delivery.outlet.eos_delivered = false;
        delivery.outlet.samples_sent = 0;
        info!("stream restarted");
    }

    /// Records an error returned by the engine.
    ///
    /// A fatal error puts the pipeline in a fault state that behaves like a flush until the next
    /// flush or restart. Other errors only cost the access unit being decoded.
    pub fn report_engine_error(&self, err: &EngineError) {
        bump(&self.counters.decode_failures, 1);
        if err.is_fatal() {
            error!("decode engine failed, halting stream: {}", err);
            {
                // The engine is reset after a flush anyway; only a failure outside one faults.
                let mut control = self.control.lock();
                control.faulted |= control.stream != StreamState::Flushing;
            }
            self.halt();
            self.discard_pending(false);
        } else {
            warn!("dropped access unit: {}", err);
        }
    }

    /// Rejects new data and releases blocked ring buffer clients.
    fn halt(&self) {
        {
            let mut control = self.control.lock();
            control.stream = StreamState::Flushing;
            control.drain_requested = false;
            control.flush_generation += 1;
        }
        self.ring.begin_flush();
    }

    fn discard_pending(&self, notify_sink: bool) {
        let mut delivery = self.delivery.lock();
        let discarded = delivery.reorder.discard();
        if discarded > 0 {
            debug!("discarded {} pending pictures", discarded);
        }
        bump(&self.counters.pictures_discarded, discarded as u64);
        delivery.outlet.samples_sent = 0;
        if notify_sink {
            delivery.outlet.sink.begin_flush();
        }
    }

    fn deliver(&self, outlet: &mut Outlet, picture: DecodedPicture) {
        if outlet.eos_delivered {
            bump(&self.counters.pictures_discarded, 1);
            return;
        }

        let sample = OutputSample::new(outlet.samples_sent, self.params.frame_duration(), picture);
        let sequence = sample.sequence;
        outlet.samples_sent += 1;
        if outlet.sink.deliver(sample) {
            bump(&self.counters.pictures_delivered, 1);
            return;
        }

        bump(&self.counters.delivery_failures, 1);
        if self.control.lock().eos_received {
            info!("sink refused sample {} after end of stream", sequence);
            self.deliver_end_of_stream(outlet);
        } else {
            warn!("sink refused sample {}", sequence);
        }
    }

    fn deliver_end_of_stream(&self, outlet: &mut Outlet) {
        outlet.eos_delivered = true;
        outlet.sink.deliver_end_of_stream();
        bump(&self.counters.eos_delivered, 1);
        info!("end of stream delivered after {} samples", outlet.samples_sent);
    }
}

impl EngineCallbacks for PipelineController {
    fn sequence_changed(&self, format: &StreamFormat) -> bool {
        if format.coded_width == 0 || format.coded_height == 0 {
            error!("engine reported an empty picture size: {:?}", format);
            return false;
        }
        if format.min_num_surfaces > self.params.max_decode_surfaces {
            error!(
                "stream needs {} surfaces, only {} are configured",
                format.min_num_surfaces, self.params.max_decode_surfaces
            );
            return false;
        }

        let mut delivery = self.delivery.lock();
        let outlet = &mut delivery.outlet;
        if outlet.format.as_ref() == Some(format) {
            return true;
        }
        if !outlet.sink.format_changed(format) {
            warn!("sink refused format {:?}", format);
            return false;
        }
        info!(
            "{} sequence {}x{}, {} surfaces",
            format.codec, format.coded_width, format.coded_height, format.min_num_surfaces
        );
        outlet.format = Some(*format);
        bump(&self.counters.format_changes, 1);
        true
    }

    fn decode_picture(&self, surface: SurfaceIndex) -> bool {
        if surface >= self.params.max_decode_surfaces {
            error!(
                "engine asked for surface {} of {}",
                surface, self.params.max_decode_surfaces
            );
            return false;
        }

        let mut delivery = self.delivery.lock();
        let DeliveryState { reorder, outlet } = &mut *delivery;
        let forced = reorder.reserve_surface(surface, |picture| self.deliver(outlet, picture));
        if forced > 0 {
            warn!(
                "surface {} still pending display, emitted {} pictures early",
                surface, forced
            );
            bump(&self.counters.forced_evictions, forced as u64);
        }
        true
    }

    fn picture_ready(&self, picture: DecodedPicture) {
        let mut delivery = self.delivery.lock();
        let stale = {
            let control = self.control.lock();
            control.stream == StreamState::Flushing
                || control.engine_generation != control.flush_generation
        };
        if stale || delivery.outlet.eos_delivered {
            bump(&self.counters.pictures_discarded, 1);
            return;
        }

        let DeliveryState { reorder, outlet } = &mut *delivery;
        let forced = reorder.admit(picture.surface_index, picture, |picture| {
            self.deliver(outlet, picture)
        });
        bump(&self.counters.forced_evictions, forced as u64);
    }
}
