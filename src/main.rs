// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs an elementary stream through the decode pipeline using the simulated engine.

mod cmdline;
mod config;
mod output;

use std::fs::File;
use std::io::Read;
use std::time::Duration;

use anyhow::Context;
use base::error;
use base::info;
use base::syslog;
use base::syslog::LogConfig;
use base::warn;
use hwdec::backend::simulated::SimulatedBackend;
use hwdec::LoopStats;
use hwdec::Pipeline;
use hwdec::PipelineStats;
use serde::Serialize;

use crate::cmdline::Args;
use crate::output::PayloadSink;

#[derive(Serialize)]
struct Report {
    end_of_stream: bool,
    engine_failed: bool,
    pipeline: PipelineStats,
    consumer: LoopStats,
}

fn run_stream(args: Args) -> anyhow::Result<Report> {
    let params = config::params_from_args(&args)?;
    let sink = match &args.output {
        Some(path) => PayloadSink::create(path)?,
        None => PayloadSink::discard(),
    };
    let mut input = File::open(&args.input)
        .with_context(|| format!("failed to open input {}", args.input.display()))?;

    let mut backend = SimulatedBackend {
        hold: args.hold,
        ..Default::default()
    };
    let pipeline = Pipeline::start(&mut backend, args.codec, params, sink)
        .context("failed to start pipeline")?;
    pipeline.run().context("failed to start consumer")?;

    let mut buf = vec![0u8; args.write_size];
    let mut total = 0usize;
    loop {
        let len = input
            .read(&mut buf)
            .with_context(|| format!("failed to read input {}", args.input.display()))?;
        if len == 0 {
            break;
        }
        if !pipeline.submit(&buf[..len]) {
            warn!("pipeline rejected input after {} bytes", total);
            break;
        }
        total += len;
    }
    info!("submitted {} bytes", total);

    pipeline.notify_end_of_stream();
    let end_of_stream = pipeline.wait_for_end_of_stream(Duration::from_millis(args.timeout_ms));
    if !end_of_stream {
        warn!("end of stream not delivered within {}ms", args.timeout_ms);
    }

    let engine_failed = pipeline.controller().is_faulted();
    let stats = pipeline.stats();
    let consumer = pipeline.stop().context("failed to stop pipeline")?;
    Ok(Report {
        end_of_stream,
        engine_failed,
        pipeline: stats,
        consumer,
    })
}

fn main() {
    let args: Args = argh::from_env();
    if let Err(e) = syslog::init_with(LogConfig {
        filter: args.log_level.clone(),
    }) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let report = match run_stream(args) {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("failed to serialize report: {}", e);
            std::process::exit(1);
        }
    }
    if report.engine_failed {
        std::process::exit(1);
    }
    if !report.end_of_stream {
        std::process::exit(2);
    }
}
