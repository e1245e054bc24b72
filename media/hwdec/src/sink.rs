// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Duration;

use crate::backend::DecodedPicture;
use crate::backend::StreamFormat;

/// A decoded picture on its way to the sink, stamped with its position in the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSample {
    /// Number of samples delivered before this one since the last flush.
    pub sequence: u64,
    pub start_time: Duration,
    pub end_time: Duration,
    pub picture: DecodedPicture,
}

impl OutputSample {
    pub(crate) fn new(sequence: u64, frame_duration: Duration, picture: DecodedPicture) -> Self {
        let start_time = frame_duration.saturating_mul(sequence.try_into().unwrap_or(u32::MAX));
        OutputSample {
            sequence,
            start_time,
            end_time: start_time.saturating_add(frame_duration),
            picture,
        }
    }
}

/// Downstream consumer of decoded pictures.
///
/// All methods are called with the pipeline's delivery lock held, so they are never called
/// concurrently. They must not call back into the pipeline.
pub trait PictureSink: Send {
    /// Hand over one picture, in presentation order. Returns whether the sink accepted it.
    fn deliver(&mut self, sample: OutputSample) -> bool;

    /// No more pictures will follow until the stream is flushed or restarted. Called at most once
    /// per stream.
    fn deliver_end_of_stream(&mut self);

    /// The pictures that follow use `format`. Returning `false` stops the engine from decoding the
    /// new sequence.
    fn format_changed(&mut self, _format: &StreamFormat) -> bool {
        true
    }

    fn begin_flush(&mut self) {}

    fn end_flush(&mut self) {}
}
