// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Grid LiDAR Library
//!
//! Reassembly of 256×192×3 flash LiDAR frames from UDP sub-frame packets.
//!
//! # Architecture
//!
//! The sensor streams each frame as ~1664 fixed-size packets, each carrying
//! a 6-row × 5-column tile of the sensing grid. Packets arrive unordered and
//! some are lost, so frames are closed by heuristics rather than by a
//! reliable end marker.
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  PacketSource   │ ──► │ BoundedQueue │ ──► │ SourceRouter │
//! │  (UDP/pcap/test)│     │  (drop-new)  │     │ (per sensor) │
//! └─────────────────┘     └──────────────┘     └──────────────┘
//!       udp_recv                                      │
//!                                                     ▼
//!                         ┌──────────────┐     ┌──────────────┐
//!                         │  CloudSink   │ ◄── │ FrameDecoder │
//!                         │  (PLY/user)  │     │  (grid, FSM) │
//!                         └──────────────┘     └──────────────┘
//!                                                frame_decode
//! ```
//!
//! # Modules
//!
//! - [`lidar`]: Common types, traits, and error handling
//! - [`cloud`]: Point and point cloud types
//! - [`packet`]: Wire format of the sub-frame packet
//! - [`queue`]: Bounded queue between the receive and decode threads
//! - [`config`]: Sensor table, completion policy and echo filter
//! - [`decoder`]: Per-sensor frame reassembly state machine
//! - [`router`]: Sensor demultiplexing and pipeline context
//! - [`packet_source`]: Packet source abstraction for testing
//! - [`pipeline`]: Receive and decode threads
//! - [`ply`]: PLY persistence sink
//! - [`common`]: Shared utilities (priority, socket config)
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_gridlidar::{FrameDecoder, FrameResult, config::DecoderConfig};
//!
//! let mut decoder = FrameDecoder::new(DecoderConfig::default())?;
//!
//! loop {
//!     let len = socket.recv(&mut buf)?;
//!     if let FrameResult::Completed(cloud) = decoder.feed(&buf[..len]) {
//!         for point in &cloud {
//!             println!("{} {} {} {}", point.x, point.y, point.z, point.intensity);
//!         }
//!     }
//! }
//! ```

pub mod args;
pub mod cloud;
pub mod common;
pub mod config;
pub mod decoder;
pub mod lidar;
pub mod packet;
pub mod packet_source;
#[cfg(feature = "pcap")]
pub mod pcap_source;
pub mod pipeline;
pub mod ply;
pub mod queue;
pub mod router;

// Re-exports for convenience
pub use cloud::{Point3D, PointCloud};
pub use decoder::{FrameDecoder, FrameResult, Rejection};
pub use lidar::{CloudSink, Error, SensorId};
pub use packet_source::PacketSource;
#[cfg(feature = "pcap")]
pub use pcap_source::PcapSource;
pub use pipeline::{Pipeline, PipelineHandle};
pub use queue::BoundedQueue;
pub use router::{PipelineContext, SourceRouter};
