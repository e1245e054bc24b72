// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A software stand-in for a hardware decode engine.
//!
//! The engine does not reconstruct pixels. It splits an Annex B byte stream into NAL units,
//! reports a sequence change for every new sequence parameter set and produces one picture per
//! first slice of a picture, carrying the slice bytes as payload. Surfaces are handed out
//! round-robin and the last `hold` pictures are kept inside the engine, like a real decoder
//! keeping reference frames for display reordering, until more pictures or `flush_to_end()` push
//! them out.

use std::collections::VecDeque;
use std::sync::Arc;

use base::debug;

use crate::backend::ChromaFormat;
use crate::backend::Codec;
use crate::backend::DecodeEngine;
use crate::backend::DecodedPicture;
use crate::backend::DecoderBackend;
use crate::backend::EngineCallbacks;
use crate::backend::EngineConfig;
use crate::backend::EngineError;
use crate::backend::EngineResult;
use crate::backend::StreamFormat;
use crate::backend::SurfaceIndex;

const START_CODE: [u8; 3] = [0x0, 0x0, 0x1];

const H264_NAL_SLICE: u8 = 1;
const H264_NAL_SLICE_IDR: u8 = 5;
const H264_NAL_SPS: u8 = 7;
const HEVC_NAL_VCL_MAX: u8 = 21;
const HEVC_NAL_SPS: u8 = 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalKind {
    SequenceParameters,
    /// First slice of a new picture.
    PictureStart,
    Other,
}

fn classify(codec: Codec, nal: &[u8]) -> NalKind {
    let Some(&header) = nal.first() else {
        return NalKind::Other;
    };
    // The first bit of the slice header is `first_mb_in_slice == 0` for H.264 (an exp-Golomb 0)
    // and `first_slice_segment_in_pic_flag` for HEVC.
    match codec {
        Codec::H264 => match header & 0x1f {
            H264_NAL_SPS => NalKind::SequenceParameters,
            H264_NAL_SLICE | H264_NAL_SLICE_IDR
                if nal.get(1).map_or(false, |b| b & 0x80 != 0) =>
            {
                NalKind::PictureStart
            }
            _ => NalKind::Other,
        },
        Codec::Hevc => match (header >> 1) & 0x3f {
            HEVC_NAL_SPS => NalKind::SequenceParameters,
            t if t <= HEVC_NAL_VCL_MAX && nal.get(2).map_or(false, |b| b & 0x80 != 0) => {
                NalKind::PictureStart
            }
            _ => NalKind::Other,
        },
    }
}

fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(START_CODE.len())
        .position(|window| window == START_CODE)
        .map(|pos| from + pos)
}

/// Strips the zero bytes that belong to the next four-byte start code or to trailing padding.
fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
    &nal[..end]
}

/// Creates `SimulatedEngine`s.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    /// Number of pictures the engine keeps until newer ones arrive or it is flushed.
    pub hold: usize,
    pub coded_width: u32,
    pub coded_height: u32,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        SimulatedBackend {
            hold: 2,
            coded_width: 320,
            coded_height: 240,
        }
    }
}

impl DecoderBackend for SimulatedBackend {
    type Engine = SimulatedEngine;

    fn initialize(
        &mut self,
        config: &EngineConfig,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> EngineResult<SimulatedEngine> {
        if self.hold >= config.max_decode_surfaces as usize {
            return Err(EngineError::InitFailed(format!(
                "holding {} pictures needs more than {} surfaces",
                self.hold, config.max_decode_surfaces
            )));
        }
        Ok(SimulatedEngine {
            callbacks,
            format: StreamFormat {
                codec: config.codec,
                coded_width: self.coded_width,
                coded_height: self.coded_height,
                chroma_format: ChromaFormat::Yuv420,
                min_num_surfaces: self.hold as u32 + 1,
            },
            num_surfaces: config.max_decode_surfaces,
            hold: self.hold,
            pending: Vec::new(),
            active_sps: None,
            next_surface: 0,
            next_presentation: 0,
            held: VecDeque::new(),
        })
    }
}

pub struct SimulatedEngine {
    callbacks: Arc<dyn EngineCallbacks>,
    format: StreamFormat,
    num_surfaces: u32,
    hold: usize,
    /// Stream bytes not yet split into complete NAL units.
    pending: Vec<u8>,
    /// Payload of the sequence parameter set the callbacks accepted last.
    active_sps: Option<Vec<u8>>,
    next_surface: SurfaceIndex,
    next_presentation: u64,
    held: VecDeque<DecodedPicture>,
}

impl SimulatedEngine {
    /// Splits the next complete NAL unit off `pending`.
    fn next_complete_nal(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find_start_code(&self.pending, 0) else {
            // Keep a possible partial start code, drop the rest.
            let keep_from = self.pending.len().saturating_sub(START_CODE.len() - 1);
            self.pending.drain(..keep_from);
            return None;
        };
        let end = find_start_code(&self.pending, start + START_CODE.len())?;
        let unit: Vec<u8> = self.pending.drain(..end).collect();
        Some(trim_trailing_zeros(&unit[start + START_CODE.len()..]).to_vec())
    }

    fn process_nal(&mut self, nal: &[u8]) -> EngineResult<()> {
        match classify(self.format.codec, nal) {
            NalKind::SequenceParameters => self.start_sequence(nal),
            NalKind::PictureStart => self.decode_picture(nal),
            NalKind::Other => Ok(()),
        }
    }

    fn start_sequence(&mut self, sps: &[u8]) -> EngineResult<()> {
        if self.active_sps.as_deref() == Some(sps) {
            return Ok(());
        }
        if !self.callbacks.sequence_changed(&self.format) {
            self.active_sps = None;
            return Err(EngineError::Rejected(String::from(
                "sequence change refused",
            )));
        }
        debug!(
            "simulated engine: new sequence {}x{}",
            self.format.coded_width, self.format.coded_height
        );
        self.active_sps = Some(sps.to_vec());
        Ok(())
    }

    fn decode_picture(&mut self, slice: &[u8]) -> EngineResult<()> {
        if self.active_sps.is_none() {
            return Err(EngineError::Rejected(String::from(
                "picture data before a sequence header",
            )));
        }

        let surface = self.next_surface;
        if !self.callbacks.decode_picture(surface) {
            return Err(EngineError::Rejected(format!(
                "surface {} refused for decoding",
                surface
            )));
        }
        self.next_surface = (self.next_surface + 1) % self.num_surfaces;

        self.held.push_back(DecodedPicture {
            surface_index: surface,
            presentation_index: self.next_presentation,
            progressive: true,
            top_field_first: false,
            data: slice.to_vec(),
        });
        self.next_presentation += 1;

        while self.held.len() > self.hold {
            if let Some(picture) = self.held.pop_front() {
                self.callbacks.picture_ready(picture);
            }
        }
        Ok(())
    }
}

impl DecodeEngine for SimulatedEngine {
    fn decode(&mut self, data: &[u8]) -> EngineResult<()> {
        self.pending.extend_from_slice(data);
        while let Some(nal) = self.next_complete_nal() {
            self.process_nal(&nal)?;
        }
        Ok(())
    }

    fn flush_to_end(&mut self) -> EngineResult<()> {
        let last = find_start_code(&self.pending, 0)
            .map(|start| trim_trailing_zeros(&self.pending[start + START_CODE.len()..]).to_vec());
        self.pending.clear();
        let res = match last {
            Some(nal) => self.process_nal(&nal),
            None => Ok(()),
        };

        while let Some(picture) = self.held.pop_front() {
            self.callbacks.picture_ready(picture);
        }
        res
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.pending.clear();
        self.held.clear();
        Ok(())
    }
}
