// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common types shared by the decoder, router and pipeline.
//!
//! This module holds the crate-wide [`Error`] type, the [`SensorId`] used to
//! key per-sensor state, and the [`CloudSink`] trait through which completed
//! point clouds leave the core.

use crate::cloud::PointCloud;
use std::{fmt, net::IpAddr};

/// Identity of a sensor on the wire.
///
/// The pipeline keys sensors by the low byte of the sender's address only.
/// Two sensors whose addresses differ only in the higher bytes alias to the
/// same identity and therefore share one decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId(pub u8);

impl SensorId {
    /// Derive the sensor identity from a sender address.
    ///
    /// IPv4 uses the last octet. IPv6 uses the low byte of the last segment,
    /// which for IPv4-mapped addresses is again the last IPv4 octet.
    pub fn from_addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => SensorId(v4.octets()[3]),
            IpAddr::V6(v6) => SensorId(v6.octets()[15]),
        }
    }
}

impl From<u8> for SensorId {
    fn from(value: u8) -> Self {
        SensorId(value)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common error type for pipeline operations
///
/// Decoding never fails with an `Error`: malformed packets are reported
/// through [`crate::decoder::FrameResult::Rejected`]. Errors are reserved for
/// I/O, configuration and startup failures.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket, file operations)
    Io(std::io::Error),
    /// JSON configuration could not be parsed
    Json(serde_json::Error),
    /// Invalid packet or capture data
    InvalidPacket(String),
    /// Unexpected end of data at given byte position
    UnexpectedEnd(usize),
    /// Configuration error
    Config(String),
    /// Malformed PLY file
    Ply(String),
    /// System time error
    SystemTime(std::time::SystemTimeError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
            Error::InvalidPacket(msg) => write!(f, "invalid packet: {}", msg),
            Error::UnexpectedEnd(len) => write!(f, "unexpected end of data at {} bytes", len),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Ply(msg) => write!(f, "ply error: {}", msg),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

/// Consumer of completed point clouds.
///
/// The processing thread calls [`CloudSink::on_cloud_ready`] exactly once
/// per completed frame, synchronously. A slow sink stalls the processing
/// thread and with it the queue drain rate, so sinks that do heavy I/O
/// should hand the cloud off to their own thread.
pub trait CloudSink: Send {
    /// Take ownership of a completed point cloud.
    fn on_cloud_ready(&mut self, cloud: PointCloud);
}

impl<F> CloudSink for F
where
    F: FnMut(PointCloud) + Send,
{
    fn on_cloud_ready(&mut self, cloud: PointCloud) {
        self(cloud)
    }
}

/// Get current timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}
