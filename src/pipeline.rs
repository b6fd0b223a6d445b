// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Two-thread ingestion pipeline.
//!
//! ```text
//! ┌──────────────┐ push  ┌──────────────┐ pop  ┌──────────────────────────┐
//! │ udp_recv     │ ────► │ BoundedQueue │ ───► │ frame_decode             │
//! │ PacketSource │ drop  │  <RawPacket> │      │ router → decoder → sink  │
//! └──────────────┘ on    └──────────────┘      └──────────────────────────┘
//!                  full
//! ```
//!
//! The receive thread of a live source never blocks on the decoder: when the
//! queue is full the newest packet is dropped and counted. A finite source
//! (pcap replay, test data) waits for queue space instead, so replay output
//! does not depend on timing. The processing thread owns the
//! [`PipelineContext`] and the [`CloudSink`], so neither needs locking.
//!
//! Shutdown clears the running flag, joins the receive thread, signals the
//! queue and joins the processing thread once it has drained the queue.
//! Frames still accumulating at that point are not flushed.

use crate::{
    common,
    decoder::{Diagnostics, FrameResult},
    lidar::{CloudSink, Error, SensorId},
    packet::PACKET_SIZE,
    packet_source::{DEFAULT_RECV_BUFFER, PacketSource},
    queue::{BoundedQueue, DEFAULT_CAPACITY},
    router::{PipelineContext, PipelineStats, SourceRouter},
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error, info, info_span, warn};

/// How long a finite source waits for queue space before rechecking the
/// running flag.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);

/// Queue entry: a datagram copied out of the receive buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPacket {
    pub sensor: SensorId,
    pub data: Vec<u8>,
}

/// Pipeline tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Queue capacity in packets
    pub capacity: usize,
    /// Receive buffer per datagram in bytes
    pub recv_buffer: usize,
    /// Request real-time scheduling for the receive thread
    pub realtime: bool,
}

impl PipelineConfig {
    /// The receive buffer must exceed [`PACKET_SIZE`] so an oversized
    /// datagram is not truncated into a valid-looking packet.
    pub fn validate(&self) -> Result<(), Error> {
        if self.recv_buffer <= PACKET_SIZE {
            return Err(Error::Config(format!(
                "receive buffer {} bytes must be larger than the {} byte packet",
                self.recv_buffer, PACKET_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            recv_buffer: DEFAULT_RECV_BUFFER,
            realtime: false,
        }
    }
}

/// Final counters returned by [`PipelineHandle::shutdown`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineReport {
    pub received: u64,
    pub dropped: u64,
    pub processed: u64,
    pub rejected: u64,
    pub frames_completed: u64,
    pub recv_errors: u64,
    /// Per-sensor decoder diagnostics
    pub sensors: BTreeMap<SensorId, Diagnostics>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "received {} dropped {} processed {} rejected {} frames {} recv errors {} sensors {}",
            self.received,
            self.dropped,
            self.processed,
            self.rejected,
            self.frames_completed,
            self.recv_errors,
            self.sensors.len()
        )
    }
}

/// Entry point for starting a pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start the receive and processing threads.
    pub fn spawn<S, K>(
        source: S,
        context: PipelineContext,
        sink: K,
        config: PipelineConfig,
    ) -> Result<PipelineHandle, Error>
    where
        S: PacketSource + 'static,
        K: CloudSink + 'static,
    {
        config.validate()?;
        let queue = Arc::new(BoundedQueue::new(config.capacity));
        let running = Arc::new(AtomicBool::new(true));
        let stats = context.stats.clone();

        let processor = {
            let queue = queue.clone();
            thread::Builder::new()
                .name("frame_decode".to_string())
                .spawn(move || process_loop(&queue, context, sink))?
        };

        let receiver = {
            let recv_queue = queue.clone();
            let running = running.clone();
            let stats = stats.clone();
            let spawned = thread::Builder::new()
                .name("udp_recv".to_string())
                .spawn(move || receive_loop(source, &recv_queue, &stats, &running, &config));
            match spawned {
                Ok(handle) => handle,
                Err(err) => {
                    queue.set_exit();
                    let _ = processor.join();
                    return Err(err.into());
                }
            }
        };

        info!("pipeline started, queue capacity {}", queue.capacity());

        Ok(PipelineHandle {
            running,
            queue,
            stats,
            receiver: Some(receiver),
            processor: Some(processor),
        })
    }
}

/// Handle on a running pipeline. Dropping it shuts the pipeline down.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    queue: Arc<BoundedQueue<RawPacket>>,
    stats: Arc<PipelineStats>,
    receiver: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<SourceRouter>>,
}

impl PipelineHandle {
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Packets currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.size()
    }

    /// Block until the receive thread has finished.
    ///
    /// Returns once a finite source (test, pcap) is exhausted. A live UDP
    /// source only finishes after [`Self::shutdown`].
    pub fn wait_source(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            if receiver.join().is_err() {
                error!("udp_recv thread panicked");
            }
        }
    }

    /// Stop both threads and collect the final counters.
    pub fn shutdown(mut self) -> PipelineReport {
        let router = self.stop();
        let mut report = PipelineReport {
            received: self.stats.received(),
            dropped: self.stats.dropped(),
            processed: self.stats.processed(),
            rejected: self.stats.rejected(),
            frames_completed: self.stats.frames_completed(),
            recv_errors: self.stats.recv_errors(),
            sensors: BTreeMap::new(),
        };
        if let Some(router) = router {
            report.sensors = router.diagnostics();
        }
        info!("pipeline stopped: {}", report);
        report
    }

    fn stop(&mut self) -> Option<SourceRouter> {
        self.running.store(false, Ordering::Release);
        self.wait_source();
        self.queue.set_exit();

        let processor = self.processor.take()?;
        match processor.join() {
            Ok(router) => Some(router),
            Err(_) => {
                error!("frame_decode thread panicked");
                None
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.processor.is_some() {
            self.stop();
        }
    }
}

fn receive_loop<S: PacketSource>(
    mut source: S,
    queue: &BoundedQueue<RawPacket>,
    stats: &PipelineStats,
    running: &AtomicBool,
    config: &PipelineConfig,
) {
    if config.realtime {
        common::set_process_priority();
    }

    let mut buf = vec![0u8; config.recv_buffer];
    let live = source.is_live();

    while running.load(Ordering::Acquire) && source.has_more() {
        let datagram = match source.recv(&mut buf) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(err) => {
                PipelineStats::increment(&stats.recv_errors);
                error!("udp_recv error: {}", err);
                continue;
            }
        };

        PipelineStats::increment(&stats.received);
        let packet = RawPacket {
            sensor: datagram.sensor,
            data: buf[..datagram.len].to_vec(),
        };

        let queued = if live {
            queue.push(packet)
        } else {
            push_backpressure(queue, packet, running)
        };

        if !queued {
            PipelineStats::increment(&stats.dropped);
            let dropped = stats.dropped();
            if dropped == 1 || dropped % 1000 == 0 {
                warn!(
                    "queue full ({} packets), {} packets dropped so far",
                    queue.capacity(),
                    dropped
                );
            }
        }
    }

    debug!("udp_recv exiting after {} packets", stats.received());
}

/// Wait for queue space until the pipeline stops.
fn push_backpressure(
    queue: &BoundedQueue<RawPacket>,
    mut packet: RawPacket,
    running: &AtomicBool,
) -> bool {
    loop {
        match queue.push_wait(packet, BACKPRESSURE_POLL) {
            Ok(()) => return true,
            Err(rejected) if running.load(Ordering::Acquire) && !queue.is_exiting() => {
                packet = rejected;
            }
            Err(_) => return false,
        }
    }
}

fn process_loop<K: CloudSink>(
    queue: &BoundedQueue<RawPacket>,
    mut context: PipelineContext,
    mut sink: K,
) -> SourceRouter {
    while let Some(packet) = queue.pop() {
        PipelineStats::increment(&context.stats.processed);

        match context.router.resolve(packet.sensor).feed(&packet.data) {
            FrameResult::Incomplete => {}
            FrameResult::Completed(cloud) => {
                PipelineStats::increment(&context.stats.frames_completed);
                let span = info_span!(
                    "cloud_ready",
                    sensor = %cloud.sensor,
                    frame_id = cloud.frame_id,
                    points = cloud.len()
                );
                let _guard = span.enter();
                sink.on_cloud_ready(cloud);
            }
            FrameResult::Rejected(_) => {
                PipelineStats::increment(&context.stats.rejected);
            }
        }
    }

    debug!(
        "frame_decode exiting after {} packets",
        context.stats.processed()
    );
    context.router
}
