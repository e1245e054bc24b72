// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use base::error;
use base::info;
use hwdec::backend::StreamFormat;
use hwdec::OutputSample;
use hwdec::PictureSink;

/// Sink writing the payload of each picture to a file, or dropping it when there is no file.
pub struct PayloadSink {
    writer: Option<BufWriter<File>>,
}

impl PayloadSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        Ok(PayloadSink {
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn discard() -> Self {
        PayloadSink { writer: None }
    }
}

impl PictureSink for PayloadSink {
    fn deliver(&mut self, sample: OutputSample) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return true;
        };
        match writer.write_all(&sample.picture.data) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write sample {}: {}", sample.sequence, e);
                false
            }
        }
    }

    fn deliver_end_of_stream(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                error!("failed to flush output file: {}", e);
            }
        }
    }

    fn format_changed(&mut self, format: &StreamFormat) -> bool {
        info!(
            "output format {}x{} {:?}, {} bytes per picture",
            format.coded_width,
            format.coded_height,
            format.chroma_format,
            format.frame_size()
        );
        true
    }
}
