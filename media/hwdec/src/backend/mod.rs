// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This module defines the interface that decode engines need to implement in order to be driven
//! by the pipeline.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

pub mod simulated;

/// Index of a picture buffer owned by the decode engine.
pub type SurfaceIndex = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    Hevc,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Codec::H264 => write!(f, "h264"),
            Codec::Hevc => write!(f, "hevc"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" | "avc" => Ok(Codec::H264),
            "hevc" | "h265" => Ok(Codec::Hevc),
            _ => Err(format!("unknown codec `{}`, expected h264 or hevc", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChromaFormat {
    Monochrome,
    Yuv420,
    Yuv422,
    Yuv444,
}

/// Layout of the pictures the engine is about to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub codec: Codec,
    pub coded_width: u32,
    pub coded_height: u32,
    pub chroma_format: ChromaFormat,
    /// Number of surfaces the engine needs to decode this stream.
    pub min_num_surfaces: u32,
}

impl StreamFormat {
    /// Size in bytes of one 8-bit picture in this format.
    pub fn frame_size(&self) -> usize {
        let luma = self.coded_width as usize * self.coded_height as usize;
        match self.chroma_format {
            ChromaFormat::Monochrome => luma,
            ChromaFormat::Yuv420 => luma + luma / 2,
            ChromaFormat::Yuv422 => luma * 2,
            ChromaFormat::Yuv444 => luma * 3,
        }
    }
}

/// A picture produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPicture {
    /// Surface the picture was decoded into.
    pub surface_index: SurfaceIndex,
    /// Position of the picture in presentation order, as counted by the engine.
    pub presentation_index: u64,
    pub progressive: bool,
    pub top_field_first: bool,
    pub data: Vec<u8>,
}

#[sorted]
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum EngineError {
    /// The engine cannot continue; the pipeline must be flushed or restarted.
    #[error("fatal decode engine failure: {0}")]
    Fatal(String),
    #[error("failed to initialize decode engine: {0}")]
    InitFailed(String),
    /// The submitted access unit was dropped. Decoding can continue with the next one.
    #[error("decode engine rejected access unit: {0}")]
    Rejected(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_) | EngineError::InitFailed(_))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Receives notifications from a decode engine.
///
/// Callbacks may be invoked from within `DecodeEngine` methods or from a thread owned by the
/// engine.
pub trait EngineCallbacks: Send + Sync {
    /// The engine found a new sequence with the given `format`. Returning `false` makes the engine
    /// stop decoding the current access unit.
    fn sequence_changed(&self, format: &StreamFormat) -> bool;

    /// The engine is about to decode a picture into `surface`. Returns once the surface can be
    /// overwritten, or `false` if the surface cannot be used.
    fn decode_picture(&self, surface: SurfaceIndex) -> bool;

    /// A decoded picture is ready for display.
    fn picture_ready(&self, picture: DecodedPicture);
}

/// Contains the engine's state for one stream.
pub trait DecodeEngine: Send {
    /// Submit compressed bytes. They do not need to be aligned to access unit boundaries: the
    /// engine keeps incomplete units until more data arrives.
    fn decode(&mut self, data: &[u8]) -> EngineResult<()>;

    /// Signal the end of the data: decode whatever incomplete unit is left and emit every picture
    /// the engine still holds.
    fn flush_to_end(&mut self) -> EngineResult<()>;

    /// Drop all queued data and held pictures without emitting them.
    fn reset(&mut self) -> EngineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub codec: Codec,
    pub max_decode_surfaces: u32,
}

pub trait DecoderBackend {
    type Engine: DecodeEngine + 'static;

    /// Create an engine for `config` that reports to `callbacks`.
    fn initialize(
        &mut self,
        config: &EngineConfig,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> EngineResult<Self::Engine>;
}
