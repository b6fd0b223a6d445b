// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! ASCII PLY persistence of completed clouds.
//!
//! Files are grouped by local date:
//!
//! ```text
//! <root>/20250314/cloud_20250314_101502_lidar_front_1234.ply
//! ```

use crate::{
    cloud::{Point3D, PointCloud},
    config::SensorRegistry,
    lidar::{CloudSink, Error, SensorId},
};
use chrono::Local;
use std::{
    fs::{self, File},
    io::{BufRead, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{debug, error, info};

/// Serialize `cloud` as ASCII PLY. Origin points are skipped.
pub fn write_ply<W: Write>(writer: &mut W, cloud: &PointCloud) -> std::io::Result<usize> {
    let count = cloud.iter().filter(|p| !p.is_origin()).count();

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "comment frame_id {}", cloud.frame_id)?;
    writeln!(writer, "comment sensor {}", cloud.sensor)?;
    writeln!(writer, "element vertex {}", count)?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "property uchar intensity")?;
    writeln!(writer, "end_header")?;

    for point in cloud.iter().filter(|p| !p.is_origin()) {
        writeln!(
            writer,
            "{} {} {} {}",
            point.x, point.y, point.z, point.intensity
        )?;
    }

    Ok(count)
}

/// Parse an ASCII PLY file written by [`write_ply`].
pub fn read_ply<R: BufRead>(reader: R) -> Result<PointCloud, Error> {
    let mut lines = reader.lines();
    let mut cloud = PointCloud::new();
    let mut vertices = None;

    match lines.next().transpose()? {
        Some(line) if line.trim() == "ply" => {}
        _ => return Err(Error::Ply("missing ply magic".to_string())),
    }

    loop {
        let Some(line) = lines.next().transpose()? else {
            return Err(Error::Ply("missing end_header".to_string()));
        };
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some("end_header"), _, _) => break,
            (Some("format"), Some("ascii"), _) => {}
            (Some("format"), Some(format), _) => {
                return Err(Error::Ply(format!("unsupported format {}", format)));
            }
            (Some("comment"), Some("frame_id"), Some(value)) => {
                cloud.frame_id = parse_field(value, "frame_id")?;
            }
            (Some("comment"), Some("sensor"), Some(value)) => {
                cloud.sensor = SensorId(parse_field(value, "sensor")?);
            }
            (Some("element"), Some("vertex"), Some(value)) => {
                vertices = Some(parse_field::<usize>(value, "vertex count")?);
            }
            _ => {}
        }
    }

    let vertices = vertices.ok_or_else(|| Error::Ply("missing vertex element".to_string()))?;
    cloud.points.reserve(vertices);

    for index in 0..vertices {
        let Some(line) = lines.next().transpose()? else {
            return Err(Error::Ply(format!(
                "expected {} vertices, found {}",
                vertices, index
            )));
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(Error::Ply(format!("vertex {}: expected 4 fields", index)));
        }
        cloud.push(Point3D::new(
            parse_field(fields[0], "x")?,
            parse_field(fields[1], "y")?,
            parse_field(fields[2], "z")?,
            parse_field(fields[3], "intensity")?,
        ));
    }

    Ok(cloud)
}

fn parse_field<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| Error::Ply(format!("invalid {} '{}'", name, value)))
}

/// Cloud sink persisting every Nth cloud as a PLY file.
pub struct PlyWriter {
    root: PathBuf,
    registry: SensorRegistry,
    save_interval: u64,
    received: u64,
    written: u64,
}

impl PlyWriter {
    /// Write under `root`; an interval of 0 behaves as 1.
    pub fn new<P: AsRef<Path>>(root: P, registry: SensorRegistry, save_interval: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            registry,
            save_interval: save_interval.max(1),
            received: 0,
            written: 0,
        }
    }

    /// Clouds received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Files written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path the cloud would be written to right now.
    pub fn path_for(&self, cloud: &PointCloud) -> PathBuf {
        let now = Local::now();
        let name = self.registry.lookup(cloud.sensor).name;
        self.root.join(now.format("%Y%m%d").to_string()).join(format!(
            "cloud_{}_{}_{}.ply",
            now.format("%Y%m%d_%H%M%S"),
            name,
            cloud.frame_id
        ))
    }

    /// Write `cloud` and return its path.
    pub fn save(&mut self, cloud: &PointCloud) -> Result<PathBuf, Error> {
        let start = Instant::now();
        let path = self.path_for(cloud);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        let count = write_ply(&mut writer, cloud)?;
        writer.flush()?;

        self.written += 1;
        info!(
            "saved frame {} ({} points) to {} in {:?}",
            cloud.frame_id,
            count,
            path.display(),
            start.elapsed()
        );
        Ok(path)
    }
}

impl CloudSink for PlyWriter {
    fn on_cloud_ready(&mut self, cloud: PointCloud) {
        self.received += 1;
        if (self.received - 1) % self.save_interval != 0 {
            debug!("frame {} not saved, interval {}", cloud.frame_id, self.save_interval);
            return;
        }
        if cloud.is_empty() {
            debug!("frame {} empty, not saved", cloud.frame_id);
            return;
        }
        if let Err(err) = self.save(&cloud) {
            error!("failed to save frame {}: {}", cloud.frame_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};
    use tempfile::TempDir;

    fn sample_cloud() -> PointCloud {
        let mut cloud = PointCloud::new();
        cloud.frame_id = 1234;
        cloud.sensor = SensorId(10);
        cloud.push(Point3D::new(1.0, -2.5, 0.001953125, 10));
        cloud.push(Point3D::new(63.998047, 0.1, -0.3, 255));
        cloud.push(Point3D::new(0.0, 0.0, 0.0, 9));
        cloud
    }

    #[test]
    fn test_write_ply_header() {
        let mut out = Vec::new();
        let count = write_ply(&mut out, &sample_cloud()).unwrap();
        assert_eq!(count, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ply");
        assert_eq!(lines[1], "format ascii 1.0");
        assert!(lines.contains(&"element vertex 2"));
        assert!(lines.contains(&"property uchar intensity"));
        let end = lines.iter().position(|l| *l == "end_header").unwrap();
        assert_eq!(lines.len() - end - 1, 2);
        assert_eq!(lines[end + 1], "1 -2.5 0.001953125 10");
    }

    #[test]
    fn test_ply_round_trip_exact() {
        let cloud = sample_cloud();
        let mut out = Vec::new();
        write_ply(&mut out, &cloud).unwrap();

        let parsed = read_ply(BufReader::new(Cursor::new(out))).unwrap();
        assert_eq!(parsed.frame_id, 1234);
        assert_eq!(parsed.sensor, SensorId(10));
        assert_eq!(parsed.points(), &cloud.points()[..2]);
        assert_eq!(parsed.width, 2);
    }

    #[test]
    fn test_read_ply_errors() {
        assert!(matches!(
            read_ply(Cursor::new("not a ply\n")),
            Err(Error::Ply(_))
        ));
        assert!(matches!(
            read_ply(Cursor::new("ply\nformat binary_little_endian 1.0\nend_header\n")),
            Err(Error::Ply(_))
        ));
        let truncated = "ply\nformat ascii 1.0\nelement vertex 2\nend_header\n1 2 3 4\n";
        assert!(matches!(read_ply(Cursor::new(truncated)), Err(Error::Ply(_))));
        let bad = "ply\nformat ascii 1.0\nelement vertex 1\nend_header\n1 2 x 4\n";
        assert!(matches!(read_ply(Cursor::new(bad)), Err(Error::Ply(_))));
    }

    #[test]
    fn test_writer_layout_and_interval() {
        let dir = TempDir::new().unwrap();
        let mut writer = PlyWriter::new(dir.path(), SensorRegistry::builtin(), 2);

        for frame_id in 0..5 {
            let mut cloud = sample_cloud();
            cloud.frame_id = frame_id;
            writer.on_cloud_ready(cloud);
        }
        assert_eq!(writer.received(), 5);
        assert_eq!(writer.written(), 3);

        let day = Local::now().format("%Y%m%d").to_string();
        let mut names: Vec<String> = fs::read_dir(dir.path().join(&day))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 3);
        for name in &names {
            assert!(name.starts_with("cloud_"));
            assert!(name.contains("_lidar_front_"));
            assert!(name.ends_with(".ply"));
        }
    }

    #[test]
    fn test_writer_skips_empty_cloud() {
        let dir = TempDir::new().unwrap();
        let mut writer = PlyWriter::new(dir.path(), SensorRegistry::builtin(), 1);
        writer.on_cloud_ready(PointCloud::new());
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn test_saved_file_reads_back() {
        let dir = TempDir::new().unwrap();
        let mut writer = PlyWriter::new(dir.path(), SensorRegistry::builtin(), 1);
        let path = writer.save(&sample_cloud()).unwrap();
        let parsed = read_ply(BufReader::new(File::open(path).unwrap())).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.frame_id, 1234);
    }
}
