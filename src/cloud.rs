// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud value types.
//!
//! A [`PointCloud`] is an ordered sequence of [`Point3D`] with frame
//! metadata. It is built fresh by the decoder when a frame completes and its
//! ownership moves to the [`crate::lidar::CloudSink`].
//!
//! Points keep insertion order so downstream serialization (see
//! [`crate::ply`]) reproduces the decoder's row/column/echo scan order.

use crate::lidar::SensorId;

/// A single reconstructed point.
///
/// Coordinates are in meters. A point at exactly `(0, 0, 0)` is
/// indistinguishable from "no data" inside the decoder's grid and is never
/// emitted into a cloud.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: u8,
}

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32, intensity: u8) -> Self {
        Self { x, y, z, intensity }
    }

    /// True when all three coordinates are exactly zero.
    #[inline]
    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Completed point cloud for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PointCloud {
    /// Points in insertion order
    pub points: Vec<Point3D>,
    /// Frame sequence ID from the packet header
    pub frame_id: u32,
    /// Number of points (clouds are unorganized, so width == len)
    pub width: u32,
    /// Always 1 for unorganized clouds
    pub height: u32,
    /// Always false: validity is decided per point
    pub is_dense: bool,
    /// Sensor the cloud was assembled from
    pub sensor: SensorId,
    /// Host timestamp in nanoseconds taken when the cloud was built
    pub timestamp: u64,
    /// GPS time of day in microseconds from the packet that completed the frame
    pub sensor_time_us: u64,
}

impl PointCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty cloud with room for `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            frame_id: 0,
            width: 0,
            height: 1,
            is_dense: false,
            sensor: SensorId::default(),
            timestamp: 0,
            sensor_time_us: 0,
        }
    }

    /// Remove all points, keeping metadata and capacity.
    pub fn clear(&mut self) {
        self.points.clear();
        self.width = 0;
    }

    /// Append a point, keeping `width` in sync.
    #[inline]
    pub fn push(&mut self, point: Point3D) {
        self.points.push(point);
        self.width += 1;
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point3D> {
        self.points.iter()
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point3D;
    type IntoIter = std::slice::Iter<'a, Point3D>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
