// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_gridlidar::{
    PointCloud,
    args::Args,
    config::FileConfig,
    lidar::CloudSink,
    packet_source::{PacketSource, UdpSource},
    pipeline::{Pipeline, PipelineHandle},
    ply::PlyWriter,
    router::{PipelineContext, SourceRouter},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Destination of completed clouds.
enum Sink {
    /// `--no-save`: log each cloud
    Log,
    Ply(PlyWriter),
}

impl CloudSink for Sink {
    fn on_cloud_ready(&mut self, cloud: PointCloud) {
        match self {
            Sink::Log => info!(
                "frame {} from sensor {}: {} points",
                cloud.frame_id,
                cloud.sensor,
                cloud.len()
            ),
            Sink::Ply(writer) => writer.on_cloud_ready(cloud),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.rust_log.into())
                .from_env_lossy(),
        )
        .with_thread_names(true)
        .init();

    info!("gridlidar v{}", env!("CARGO_PKG_VERSION"));

    let file_config = match &args.config {
        Some(path) => {
            let config = FileConfig::load(path)?;
            info!("loaded configuration from {}", path.display());
            config
        }
        None => FileConfig::default(),
    };
    let registry = file_config.registry();
    for (index, sensor) in file_config.sensors.iter().enumerate() {
        info!("sensor {}: {}", index, sensor);
    }

    let decoder_config = args.decoder_config(&file_config);
    info!("echo filter: {}", decoder_config.echo_filter);
    let context = PipelineContext::new(SourceRouter::new(registry.clone(), decoder_config)?);

    let sink = if args.no_save {
        Sink::Log
    } else {
        info!(
            "saving every {} frame(s) under {}",
            args.save_interval.max(1),
            args.output.display()
        );
        Sink::Ply(PlyWriter::new(&args.output, registry, args.save_interval))
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    #[cfg(feature = "pcap")]
    {
        if let Some(path) = &args.pcap {
            let source = edgefirst_gridlidar::PcapSource::from_file(path, Some(args.port))?;
            info!("replaying {} packets from {}", source.len(), path.display());
            let mut handle = start(source, context, sink, &args)?;
            handle.wait_source();
            let report = handle.shutdown();
            info!("replay finished: {}", report);
            return Ok(());
        }
    }

    let source = UdpSource::bind(&args.udp_config())?;
    let handle = start(source, context, sink, &args)?;

    let interval = Duration::from_secs(10);
    let mut last_report = Instant::now();
    let mut last_dropped = 0;
    while running.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(100));
        if last_report.elapsed() >= interval {
            let stats = handle.stats();
            let dropped = stats.dropped();
            info!(
                "received {} frames {} rejected {} dropped {} queued {}",
                stats.received(),
                stats.frames_completed(),
                stats.rejected(),
                dropped,
                handle.queued()
            );
            if dropped > last_dropped {
                warn!("{} packets dropped in the last {:?}", dropped - last_dropped, interval);
            }
            last_dropped = dropped;
            last_report = Instant::now();
        }
    }

    info!("shutting down");
    let report = handle.shutdown();
    for (sensor, diagnostics) in &report.sensors {
        info!("sensor {}: {}", sensor, diagnostics);
    }
    info!("{}", report);

    Ok(())
}

fn start<S: PacketSource + 'static>(
    source: S,
    context: PipelineContext,
    sink: Sink,
    args: &Args,
) -> Result<PipelineHandle, edgefirst_gridlidar::Error> {
    Pipeline::spawn(source, context, sink, args.pipeline_config())
}
