// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use argh::FromArgs;
use hwdec::backend::Codec;

fn default_codec() -> Codec {
    Codec::H264
}

fn default_log_level() -> String {
    String::from("info")
}

#[derive(Debug, FromArgs)]
/// Feed an Annex B elementary stream through the decode pipeline and print its statistics.
pub struct Args {
    #[argh(positional, arg_name = "INPUT")]
    /// elementary stream (h264 or hevc) to decode
    pub input: PathBuf,
    #[argh(option, arg_name = "PATH")]
    /// pipeline parameters file, in JSON
    pub cfg: Option<PathBuf>,
    #[argh(option, default = "default_codec()")]
    /// codec of the input stream: h264 or hevc (default: h264)
    pub codec: Codec,
    #[argh(option, short = 'o', arg_name = "PATH")]
    /// write the payload of every decoded picture to PATH, in presentation order
    pub output: Option<PathBuf>,
    #[argh(option)]
    /// size of the compressed-data buffer in bytes
    pub buffer_capacity: Option<usize>,
    #[argh(option)]
    /// maximum number of bytes per decode call
    pub chunk_size: Option<usize>,
    #[argh(option)]
    /// number of pictures held back for display reordering
    pub reorder_depth: Option<usize>,
    #[argh(option)]
    /// size of the decode surface pool
    pub max_decode_surfaces: Option<u32>,
    #[argh(option, default = "2")]
    /// pictures kept inside the decode engine until flushed (default: 2)
    pub hold: usize,
    #[argh(option, default = "4096")]
    /// bytes read from INPUT per submission (default: 4096)
    pub write_size: usize,
    #[argh(option, default = "30000")]
    /// how long to wait for end of stream after the input is exhausted (default: 30000)
    pub timeout_ms: u64,
    #[argh(option, default = "default_log_level()")]
    /// log filter, e.g. "debug" or "hwdec=trace" (default: info)
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_options() {
        let early_exit = Args::from_args(&["vdpipe"], &["--help"]).unwrap_err();
        assert!(early_exit.status.is_ok());
        assert!(early_exit.output.contains("(h264 or hevc)"));
        assert!(early_exit.output.contains("--buffer-capacity"));
    }

    #[test]
    fn positional_input_required() {
        assert!(Args::from_args(&["vdpipe"], &[]).is_err());
        let args = Args::from_args(&["vdpipe"], &["clip.264", "-o", "out.yuv"]).unwrap();
        assert_eq!(args.input, PathBuf::from("clip.264"));
        assert_eq!(args.output, Some(PathBuf::from("out.yuv")));
        assert_eq!(args.hold, 2);
    }
}
