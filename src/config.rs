// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use hwdec::PipelineParams;

use crate::cmdline::Args;

/// Reads pipeline parameters from the JSON file at `path`. Missing fields keep their defaults.
pub fn load_params(path: &Path) -> anyhow::Result<PipelineParams> {
    let file = File::open(path)
        .with_context(|| format!("failed to open config file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Builds the pipeline parameters: defaults, then the `--cfg` file, then command-line overrides.
pub fn params_from_args(args: &Args) -> anyhow::Result<PipelineParams> {
    let mut params = match &args.cfg {
        Some(path) => load_params(path)?,
        None => PipelineParams::default(),
    };

    if let Some(buffer_capacity) = args.buffer_capacity {
        params.buffer_capacity = buffer_capacity;
    }
    if let Some(chunk_size) = args.chunk_size {
        params.chunk_size = chunk_size;
    }
    if let Some(reorder_depth) = args.reorder_depth {
        params.reorder_depth = reorder_depth;
    }
    if let Some(max_decode_surfaces) = args.max_decode_surfaces {
        params.max_decode_surfaces = max_decode_surfaces;
    }
    // A lowered capacity drags the low-water mark along with it.
    params.low_water_mark = params.low_water_mark.min(params.buffer_capacity);

    params.validate()?;
    validate_write_size(args.write_size, &params)?;
    Ok(params)
}

fn validate_write_size(write_size: usize, params: &PipelineParams) -> anyhow::Result<()> {
    if write_size == 0 || write_size > params.buffer_capacity {
        bail!(
            "write-size must be in 1..={}, got {}",
            params.buffer_capacity,
            write_size
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use argh::FromArgs;
    use tempfile::NamedTempFile;

    use super::*;

    fn parse_args(args: &[&str]) -> Args {
        Args::from_args(&["vdpipe"], args).unwrap()
    }

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_config() {
        let params = params_from_args(&parse_args(&["in.264"])).unwrap();
        assert_eq!(params, PipelineParams::default());
    }

    #[test]
    fn config_file_then_overrides() {
        let file = config_file(r#"{ "reorder-depth": 6, "chunk-size": 1024, "idle-poll-ms": 5 }"#);
        let path = file.path().to_str().unwrap();
        let args = parse_args(&["in.264", "--cfg", path, "--reorder-depth", "2"]);

        let params = params_from_args(&args).unwrap();
        assert_eq!(params.reorder_depth, 2);
        assert_eq!(params.chunk_size, 1024);
        assert_eq!(params.idle_poll_ms, 5);
    }

    #[test]
    fn small_capacity_lowers_low_water_mark() {
        let args = parse_args(&[
            "in.264",
            "--buffer-capacity",
            "8192",
            "--chunk-size",
            "1024",
        ]);
        let params = params_from_args(&args).unwrap();
        assert_eq!(params.buffer_capacity, 8192);
        assert_eq!(params.low_water_mark, 8192);
    }

    #[test]
    fn invalid_config_rejected() {
        let file = config_file(r#"{ "reorder-depth": 0 }"#);
        let args = parse_args(&["in.264", "--cfg", file.path().to_str().unwrap()]);
        assert!(params_from_args(&args).is_err());

        let file = config_file(r#"{ "no-such-field": 1 }"#);
        let args = parse_args(&["in.264", "--cfg", file.path().to_str().unwrap()]);
        assert!(params_from_args(&args).is_err());

        let args = parse_args(&["in.264", "--cfg", "/nonexistent/vdpipe.json"]);
        assert!(params_from_args(&args).is_err());
    }

    #[test]
    fn write_size_must_fit_buffer() {
        let args = parse_args(&[
            "in.264",
            "--buffer-capacity",
            "65536",
            "--chunk-size",
            "4096",
            "--write-size",
            "65537",
        ]);
        assert!(params_from_args(&args).is_err());
        let args = parse_args(&["in.264", "--write-size", "0"]);
        assert!(params_from_args(&args).is_err());
    }

    #[test]
    fn codec_option() {
        let args = parse_args(&["in.265", "--codec", "hevc"]);
        assert_eq!(args.codec, hwdec::backend::Codec::Hevc);
        assert!(Args::from_args(&["vdpipe"], &["in.265", "--codec", "vp9"]).is_err());
    }
}
