// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-sensor frame reassembly.
//!
//! A frame of the 256×192 flash LiDAR arrives as ~1664 sub-frame packets,
//! each covering 6 rows × 5 columns of the sensing grid (the last fragment
//! of a band covers a single column). Packets may be lost or reordered, and
//! the sensor does not always send its end marker, so the decoder decides
//! completion heuristically.
//!
//! # State machine
//!
//! ```text
//!            first packet / new frame_id
//!   ┌──────┐ ─────────────────────────► ┌──────────────────────┐
//!   │ Idle │                            │ Accumulating(frame)  │◄─┐ packet of
//!   └──────┘ ◄───────────────────────── └──────────────────────┘  │ same frame
//!        completion (emit or discard)     │  new frame_id          │
//!                                         └── forced flush ────────┘
//! ```
//!
//! # Grid
//!
//! Cells live in a `[192][256][3]` array of [`Point3D`]. A cell whose
//! coordinates are all zero holds no data, so a true return at the origin
//! cannot be represented. The grid is cleared whenever a new frame starts;
//! a completed [`PointCloud`] is a copy of the valid cells, not the grid.
//!
//! # Late packets
//!
//! Once a frame completes, further packets with its id are dropped while
//! the decoder is idle. A frame closed by a forced flush is different: by
//! default a late packet of it counts as a new frame id, so it flushes the
//! frame in progress and reopens the old one as a small ghost frame.
//! [`DecoderConfig::drop_flushed_stragglers`] drops such packets instead.

use crate::{
    cloud::{Point3D, PointCloud},
    config::{DecoderConfig, SensorConfig},
    lidar::{Error, SensorId, timestamp},
    packet::{ECHOES, PACKET_SIZE, Packet, PacketHeader},
};
use ndarray::Array3;
use std::{collections::HashSet, fmt};
use tracing::{debug, info, instrument, trace, warn};

/// Grid rows (6 rows × 32 sub-frames)
pub const GRID_HEIGHT: usize = 192;

/// Grid columns
pub const GRID_WIDTH: usize = 256;

/// Rows covered by one sub-frame
pub const ROWS_PER_SUB_FRAME: usize = 6;

/// Upper bound on the number of points in a cloud
pub const MAX_POINTS: usize = GRID_HEIGHT * GRID_WIDTH * ECHOES;

/// Why a packet was refused before touching any frame state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Packet length is not exactly [`PACKET_SIZE`]
    InvalidLength { len: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::InvalidLength { len } => {
                write!(f, "invalid packet size {} bytes, expected {}", len, PACKET_SIZE)
            }
        }
    }
}

/// Outcome of feeding one packet to a [`FrameDecoder`].
#[derive(Clone, Debug, PartialEq)]
pub enum FrameResult {
    /// Packet accepted, no frame finished
    Incomplete,
    /// A frame finished and produced a cloud
    Completed(PointCloud),
    /// Packet refused, decoder state unchanged
    Rejected(Rejection),
}

impl FrameResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, FrameResult::Completed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FrameResult::Rejected(_))
    }

    /// The completed cloud, if any.
    pub fn into_cloud(self) -> Option<PointCloud> {
        match self {
            FrameResult::Completed(cloud) => Some(cloud),
            _ => None,
        }
    }
}

/// Coarse decoder state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Accumulating(u32),
}

/// Which heuristic declared a frame complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionReason {
    /// `subFrameId == 31 && startColId == 255`
    EndMarker,
    /// Enough packets and fragment coverage above the ratio
    Coverage,
    /// Packet count above the ceiling
    Ceiling,
    /// Distinct fragments at near-total coverage
    NearTotal,
    /// A newer frame id arrived before the frame finished
    ForcedFlush,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompletionReason::EndMarker => write!(f, "end marker"),
            CompletionReason::Coverage => write!(f, "coverage"),
            CompletionReason::Ceiling => write!(f, "packet ceiling"),
            CompletionReason::NearTotal => write!(f, "near-total coverage"),
            CompletionReason::ForcedFlush => write!(f, "forced flush"),
        }
    }
}

/// Assembly bookkeeping for the frame in progress.
#[derive(Clone, Debug, Default)]
pub struct FrameAssembly {
    pub current_frame_id: u32,
    pub in_progress: bool,
    /// Packets received for `current_frame_id`
    pub packet_count: u32,
    /// Distinct `(subFrameId, startColId)` pairs seen
    pub seen_fragments: HashSet<(u8, u8)>,
    pub max_sub_frame_id: u8,
    pub max_start_col_id: u8,
}

impl FrameAssembly {
    fn start(&mut self, frame_id: u32) {
        self.current_frame_id = frame_id;
        self.in_progress = true;
        self.packet_count = 0;
        self.seen_fragments.clear();
    }

    /// Fraction of expected fragment slots observed.
    pub fn coverage(&self, expected_fragments: usize) -> f32 {
        self.seen_fragments.len() as f32 / expected_fragments as f32
    }
}

/// Running counters, for logs and monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Diagnostics {
    pub current_frame_id: u32,
    pub packet_count: u32,
    pub max_sub_frame_id: u8,
    pub max_start_col_id: u8,
    /// Echo cells written with data since the decoder was created
    pub processed_points: u64,
    pub frames_completed: u64,
    pub frames_flushed: u64,
    pub frames_discarded: u64,
    pub packets_rejected: u64,
    pub cells_out_of_range: u64,
    pub stragglers: u64,
    pub last_completion: Option<CompletionReason>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "processed points {}, frame {} ({} packets), max sub-frame {}, max start column {}, \
             completed {}, flushed {}, discarded {}, rejected {}, out of range {}, stragglers {}",
            self.processed_points,
            self.current_frame_id,
            self.packet_count,
            self.max_sub_frame_id,
            self.max_start_col_id,
            self.frames_completed,
            self.frames_flushed,
            self.frames_discarded,
            self.packets_rejected,
            self.cells_out_of_range,
            self.stragglers
        )
    }
}

/// Reassembles sub-frame packets from one sensor into point clouds.
///
/// Owned by the processing thread; no internal locking.
pub struct FrameDecoder {
    config: DecoderConfig,
    sensor: SensorConfig,
    grid: Array3<Point3D>,
    assembly: FrameAssembly,
    /// Frame id most recently completed, for straggler detection
    last_completed: Option<u32>,
    /// Frame id most recently force-flushed
    last_flushed: Option<u32>,
    /// GPS time of the most recent accepted packet
    last_sensor_time_us: u64,
    diagnostics: Diagnostics,
}

impl FrameDecoder {
    /// Create a decoder after validating `config`.
    pub fn new(config: DecoderConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::with_validated(config, SensorConfig::default()))
    }

    /// Create a decoder from a configuration already checked by the caller.
    pub(crate) fn with_validated(config: DecoderConfig, sensor: SensorConfig) -> Self {
        Self {
            config,
            sensor,
            grid: Array3::from_elem((GRID_HEIGHT, GRID_WIDTH, ECHOES), Point3D::default()),
            assembly: FrameAssembly::default(),
            last_completed: None,
            last_flushed: None,
            last_sensor_time_us: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Replace the static sensor configuration (name, offset).
    pub fn set_sensor_config(&mut self, sensor: SensorConfig) {
        info!("sensor configuration: {}", sensor);
        self.sensor = sensor;
    }

    pub fn sensor_config(&self) -> &SensorConfig {
        &self.sensor
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor.id()
    }

    pub fn state(&self) -> DecoderState {
        if self.assembly.in_progress {
            DecoderState::Accumulating(self.assembly.current_frame_id)
        } else {
            DecoderState::Idle
        }
    }

    pub fn assembly(&self) -> &FrameAssembly {
        &self.assembly
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            current_frame_id: self.assembly.current_frame_id,
            packet_count: self.assembly.packet_count,
            max_sub_frame_id: self.assembly.max_sub_frame_id,
            max_start_col_id: self.assembly.max_start_col_id,
            ..self.diagnostics
        }
    }

    /// Grid cell at `row`, `col`, `echo`, if in bounds.
    pub fn cell(&self, row: usize, col: usize, echo: usize) -> Option<&Point3D> {
        self.grid.get([row, col, echo])
    }

    /// Only packets of exactly [`PACKET_SIZE`] bytes are accepted.
    #[inline]
    pub fn is_valid_message(len: usize) -> bool {
        len == PACKET_SIZE
    }

    /// Feed one packet.
    ///
    /// At most one cloud is produced per packet: a frame opened by this
    /// packet holds a single packet and cannot reach the emit floors, so a
    /// forced flush and a completion never coincide.
    pub fn feed(&mut self, data: &[u8]) -> FrameResult {
        if !Self::is_valid_message(data.len()) {
            return self.reject(data.len());
        }
        let packet = match Packet::parse(data) {
            Ok(packet) => packet,
            Err(_) => return self.reject(data.len()),
        };
        let header = *packet.header();

        let mut result = FrameResult::Incomplete;

        if !self.assembly.in_progress || header.frame_id != self.assembly.current_frame_id {
            if self.is_straggler(header.frame_id) {
                self.diagnostics.stragglers += 1;
                trace!(
                    "straggler for finished frame {}: sub-frame {} column {}",
                    header.frame_id, header.sub_frame_id, header.start_col_id
                );
                return FrameResult::Incomplete;
            }
            if self.assembly.in_progress {
                if let Some(cloud) = self.flush(header.frame_id) {
                    result = FrameResult::Completed(cloud);
                }
            }
            self.start_frame(header.frame_id);
        }

        self.assembly.packet_count += 1;
        self.assembly
            .seen_fragments
            .insert((header.sub_frame_id, header.start_col_id));
        self.last_sensor_time_us = header.gps_time.micros_of_day();

        debug!(
            "sensor {} frame {} sub-frame {} column {} packets {}",
            self.sensor.name,
            header.frame_id,
            header.sub_frame_id,
            header.start_col_id,
            self.assembly.packet_count
        );

        self.process_packet(&packet);

        if let Some(reason) = self.completion_reason(&header) {
            if let Some(cloud) = self.complete(reason) {
                return FrameResult::Completed(cloud);
            }
        }

        result
    }

    /// A packet for a frame that is no longer accumulating.
    fn is_straggler(&self, frame_id: u32) -> bool {
        let completed = !self.assembly.in_progress
            && self.config.drop_stragglers
            && self.last_completed == Some(frame_id);
        let flushed = self.config.drop_flushed_stragglers && self.last_flushed == Some(frame_id);
        completed || flushed
    }

    fn reject(&mut self, len: usize) -> FrameResult {
        let rejection = Rejection::InvalidLength { len };
        self.diagnostics.packets_rejected += 1;
        warn!("sensor {}: {}", self.sensor.name, rejection);
        FrameResult::Rejected(rejection)
    }

    fn start_frame(&mut self, frame_id: u32) {
        self.assembly.start(frame_id);
        self.grid.fill(Point3D::default());
        info!("sensor {} starting frame {}", self.sensor.name, frame_id);
    }

    /// Salvage the frame in progress because `next_frame_id` arrived.
    fn flush(&mut self, next_frame_id: u32) -> Option<PointCloud> {
        let frame_id = self.assembly.current_frame_id;
        let packets = self.assembly.packet_count;
        self.assembly.in_progress = false;
        self.last_flushed = Some(frame_id);

        if packets == 0 {
            return None;
        }

        if packets < self.config.completion.flush_min_packets {
            warn!(
                "sensor {} frame {} interrupted by frame {} after {} packets, discarded",
                self.sensor.name, frame_id, next_frame_id, packets
            );
            self.diagnostics.frames_discarded += 1;
            return None;
        }

        let cloud = self.build_point_cloud();
        if cloud.is_empty() {
            warn!(
                "sensor {} frame {} interrupted by frame {}, no valid points",
                self.sensor.name, frame_id, next_frame_id
            );
            self.diagnostics.frames_discarded += 1;
            return None;
        }

        warn!(
            "sensor {} frame {} interrupted by frame {}, flushed {} points from {} packets ({:.1}% coverage)",
            self.sensor.name,
            frame_id,
            next_frame_id,
            cloud.len(),
            packets,
            self.assembly.coverage(self.config.completion.expected_fragments) * 100.0
        );
        self.diagnostics.frames_flushed += 1;
        self.diagnostics.last_completion = Some(CompletionReason::ForcedFlush);
        Some(cloud)
    }

    /// Evaluate the completion heuristics in priority order.
    fn completion_reason(&self, header: &PacketHeader) -> Option<CompletionReason> {
        let policy = &self.config.completion;
        let packets = self.assembly.packet_count;
        let seen = self.assembly.seen_fragments.len();

        if header.is_frame_end() {
            Some(CompletionReason::EndMarker)
        } else if packets > policy.coverage_min_packets
            && self.assembly.coverage(policy.expected_fragments) > policy.coverage_ratio
        {
            Some(CompletionReason::Coverage)
        } else if packets > policy.packet_ceiling {
            Some(CompletionReason::Ceiling)
        } else if seen >= policy.near_total_fragments {
            Some(CompletionReason::NearTotal)
        } else {
            None
        }
    }

    /// Finish the current frame, emitting or discarding it.
    fn complete(&mut self, reason: CompletionReason) -> Option<PointCloud> {
        let policy = &self.config.completion;
        let frame_id = self.assembly.current_frame_id;
        let packets = self.assembly.packet_count;
        let fragments = self.assembly.seen_fragments.len();
        let min_packets = policy.min_packets;
        let fallback_min_packets = policy.fallback_min_packets;

        self.assembly.in_progress = false;
        self.last_completed = Some(frame_id);
        self.diagnostics.last_completion = Some(reason);

        if packets >= min_packets {
            let cloud = self.build_point_cloud();
            if cloud.is_empty() {
                warn!(
                    "sensor {} frame {} complete ({}) but no valid points, check the echo filter",
                    self.sensor.name, frame_id, reason
                );
            } else {
                info!(
                    "sensor {} frame {} complete ({}): {} points, {} packets, {} fragments",
                    self.sensor.name,
                    frame_id,
                    reason,
                    cloud.len(),
                    packets,
                    fragments
                );
            }
            self.diagnostics.frames_completed += 1;
            return Some(cloud);
        }

        warn!(
            "sensor {} frame {} incomplete ({}): {} packets, expected at least {}",
            self.sensor.name, frame_id, reason, packets, min_packets
        );

        if packets > fallback_min_packets {
            let cloud = self.build_point_cloud();
            if !cloud.is_empty() {
                info!(
                    "sensor {} frame {} emitted degraded: {} points",
                    self.sensor.name,
                    frame_id,
                    cloud.len()
                );
                self.diagnostics.frames_completed += 1;
                return Some(cloud);
            }
        }

        self.diagnostics.frames_discarded += 1;
        None
    }

    /// Write all payload records of `packet` into the grid.
    fn process_packet(&mut self, packet: &Packet) {
        let header = packet.header();
        let sub_frame = header.sub_frame_id as usize;
        let start_col = header.start_col_id as usize;

        self.assembly.max_sub_frame_id = self.assembly.max_sub_frame_id.max(header.sub_frame_id);
        self.assembly.max_start_col_id = self.assembly.max_start_col_id.max(header.start_col_id);

        let filter = self.config.echo_filter;
        let [ox, oy, oz] = self.sensor.offset;

        for j in 0..header.column_count() {
            for i in 0..ROWS_PER_SUB_FRAME {
                let row = sub_frame * ROWS_PER_SUB_FRAME + i;
                let col = start_col + j;
                if row >= GRID_HEIGHT || col >= GRID_WIDTH {
                    self.diagnostics.cells_out_of_range += 1;
                    trace!("cell row {} col {} out of range, skipped", row, col);
                    continue;
                }

                let Ok(entry) = packet.payload(j * ROWS_PER_SUB_FRAME + i) else {
                    continue;
                };

                for echo in 0..ECHOES {
                    let cell = &mut self.grid[[row, col, echo]];
                    if filter.accepts(echo, entry.is_chosen(echo)) {
                        let (x, y, z) = entry.position(echo);
                        *cell = Point3D::new(x + ox, y + oy, z + oz, entry.reflectivity[echo]);
                        self.diagnostics.processed_points += 1;
                    } else {
                        *cell = Point3D::default();
                    }
                }
            }
        }
    }

    /// Materialize the valid cells of the grid as a point cloud.
    ///
    /// Cells are scanned row by row, column by column, echo by echo.
    #[instrument(skip_all, fields(frame_id = self.assembly.current_frame_id))]
    pub fn build_point_cloud(&self) -> PointCloud {
        let mut cloud = PointCloud::with_capacity(MAX_POINTS / 2);
        cloud.frame_id = self.assembly.current_frame_id;
        cloud.sensor = self.sensor.id();
        cloud.timestamp = timestamp().unwrap_or(0);
        cloud.sensor_time_us = self.last_sensor_time_us;

        for point in self.grid.iter().filter(|p| !p.is_origin()) {
            cloud.push(*point);
        }

        cloud.height = 1;
        cloud.is_dense = false;
        cloud
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_validated(DecoderConfig::default(), SensorConfig::default())
    }
}
