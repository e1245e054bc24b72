// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// Largest accepted reorder depth.
pub const MAX_REORDER_DEPTH: usize = 16;
/// Largest surface pool a decode engine may be configured with.
pub const MAX_DECODE_SURFACES: u32 = 64;

/// Tunables of one decode pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct PipelineParams {
    /// Size of the compressed-data ring buffer, in bytes.
    pub buffer_capacity: usize,
    /// Unread byte count under which a blocked writer compacts the buffer.
    pub low_water_mark: usize,
    /// Maximum number of bytes handed to the engine per decode call.
    pub chunk_size: usize,
    /// Number of reorder slots between the engine and the sink.
    pub reorder_depth: usize,
    /// Size of the engine's surface pool. Surface indices are in `0..max_decode_surfaces`.
    pub max_decode_surfaces: u32,
    /// Duration of one output picture, used to stamp delivered samples.
    pub frame_duration_us: u64,
    pub write_poll_ms: u64,
    pub read_poll_ms: u64,
    pub idle_poll_ms: u64,
    pub flush_poll_ms: u64,
    /// Number of `flush_poll_ms` polls a flush waits for blocked readers and writers to leave.
    pub flush_wait_polls: u32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        PipelineParams {
            buffer_capacity: 4 << 20,
            low_water_mark: 64 << 10,
            chunk_size: 32 << 10,
            reorder_depth: 4,
            max_decode_surfaces: 20,
            frame_duration_us: 33_367,
            write_poll_ms: 2,
            read_poll_ms: 1,
            idle_poll_ms: 1,
            flush_poll_ms: 1,
            flush_wait_polls: 15,
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidParams(msg.into())
}

impl PipelineParams {
    /// Checks that the parameters describe a pipeline that can make progress.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer-capacity must be non-zero"));
        }
        if self.low_water_mark > self.buffer_capacity {
            return Err(invalid(format!(
                "low-water-mark ({}) exceeds buffer-capacity ({})",
                self.low_water_mark, self.buffer_capacity
            )));
        }
        if self.chunk_size == 0 || self.chunk_size > self.buffer_capacity {
            return Err(invalid(format!(
                "chunk-size must be in 1..={}, got {}",
                self.buffer_capacity, self.chunk_size
            )));
        }
        if self.reorder_depth == 0 || self.reorder_depth > MAX_REORDER_DEPTH {
            return Err(invalid(format!(
                "reorder-depth must be in 1..={}, got {}",
                MAX_REORDER_DEPTH, self.reorder_depth
            )));
        }
        if self.max_decode_surfaces == 0 || self.max_decode_surfaces > MAX_DECODE_SURFACES {
            return Err(invalid(format!(
                "max-decode-surfaces must be in 1..={}, got {}",
                MAX_DECODE_SURFACES, self.max_decode_surfaces
            )));
        }
        // A zero interval would turn the polling loops into busy loops.
        for (name, value) in [
            ("write-poll-ms", self.write_poll_ms),
            ("read-poll-ms", self.read_poll_ms),
            ("idle-poll-ms", self.idle_poll_ms),
            ("flush-poll-ms", self.flush_poll_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn write_poll(&self) -> Duration {
        Duration::from_millis(self.write_poll_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn flush_poll(&self) -> Duration {
        Duration::from_millis(self.flush_poll_ms)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_duration_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_params(s: &str) -> serde_json::Result<PipelineParams> {
        serde_json::from_str(s)
    }

    #[test]
    fn defaults_are_valid() {
        PipelineParams::default().validate().unwrap();
    }

    #[test]
    fn parse_partial_params() {
        let params = parse_params(r#"{ "reorder-depth": 8, "buffer-capacity": 65536 }"#).unwrap();
        assert_eq!(params.reorder_depth, 8);
        assert_eq!(params.buffer_capacity, 65536);
        assert_eq!(params.chunk_size, PipelineParams::default().chunk_size);
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        assert!(parse_params(r#"{ "reorder_depth": 8 }"#).is_err());
        assert!(parse_params(r#"{ "display-delay": 4 }"#).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = PipelineParams::default();

        let params = PipelineParams {
            buffer_capacity: 0,
            ..base.clone()
        };
        assert!(matches!(params.validate(), Err(Error::InvalidParams(_))));

        let params = PipelineParams {
            buffer_capacity: 1024,
            low_water_mark: 2048,
            chunk_size: 512,
            ..base.clone()
        };
        assert!(params.validate().is_err());

        let params = PipelineParams {
            buffer_capacity: 1024,
            low_water_mark: 256,
            chunk_size: 4096,
            ..base.clone()
        };
        assert!(params.validate().is_err());

        let params = PipelineParams {
            reorder_depth: 0,
            ..base.clone()
        };
        assert!(params.validate().is_err());

        let params = PipelineParams {
            reorder_depth: MAX_REORDER_DEPTH + 1,
            ..base.clone()
        };
        assert!(params.validate().is_err());

        let params = PipelineParams {
            max_decode_surfaces: 0,
            ..base.clone()
        };
        assert!(params.validate().is_err());

        let params = PipelineParams {
            idle_poll_ms: 0,
            ..base
        };
        assert!(params.validate().is_err());
    }
}
