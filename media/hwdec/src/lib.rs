// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Streaming core for hardware video decoding.
//!
//! Compressed bytes are pushed by an upstream thread into a [`RingBuffer`]. A consumer thread
//! ([`ConsumerLoop`]) pulls them out and feeds a [`backend::DecodeEngine`], whose callbacks hand
//! decoded pictures to the [`PipelineController`]. The controller runs them through a
//! [`ReorderQueue`] before passing them to the [`PictureSink`] in presentation order. Flush and
//! end-of-stream transitions are sequenced by the controller.
//!
//! [`Pipeline`] wires all of this together and owns the consumer thread.

pub mod backend;
mod command;
mod consumer;
mod controller;
mod error;
mod params;
mod pipeline;
pub mod reorder;
pub mod ring_buffer;
mod sink;

pub use command::Command;
pub use consumer::ConsumerLoop;
pub use consumer::LoopStats;
pub use controller::PipelineController;
pub use controller::PipelineStats;
pub use controller::StreamState;
pub use error::Error;
pub use error::Result;
pub use params::PipelineParams;
pub use pipeline::Pipeline;
pub use reorder::ReorderQueue;
pub use ring_buffer::RingBuffer;
pub use sink::OutputSample;
pub use sink::PictureSink;
