// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Wire format of the 256×192 flash LiDAR sub-frame packet.
//!
//! Every packet is exactly 1418 bytes. All multi-byte fields are big-endian.
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────┬──────────────┐
//! │ FrameHeader  64 B  │ 30 × Payload  43 B = 1290 B  │ FCS    64 B  │
//! └────────────────────┴──────────────────────────────┴──────────────┘
//!
//! FrameHeader
//!   0  pktHead         u32      22  productId       u16
//!   4  pktCnt          u16      24  frameId         u32
//!   6  pktLength       u16      28  subFrameId      u8   (0..=31)
//!   8  protocolVersion u16      29  startColId      u8   (255 = last)
//!  10  GPS timestamp   10 B     30  endColId        u8
//!  20  timeSyncType    u8       31  reserved        33 B
//!  21  timeSyncStatus  u8
//!
//! Payload (one 6-row × 1-column cell group, 3 echoes)
//!   0  x[3]            i16      24  intensity[3]    u32
//!   6  y[3]            i16      36  reflectivity[3] u8
//!  12  z[3]            i16      39  echoLabel[3]    u8   (bit 6 = echo choice)
//!  18  dist[3]         u16      42  reserved        u8
//! ```
//!
//! Fields are decoded one by one at fixed offsets from a length-checked
//! slice; nothing is reinterpreted in place.

use crate::lidar::Error;

/// Total packet size in bytes
pub const PACKET_SIZE: usize = 1418;

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Size of one payload record in bytes
pub const PAYLOAD_SIZE: usize = 43;

/// Number of payload records per packet
pub const PAYLOADS_PER_PACKET: usize = 30;

/// Trailing frame check sequence size in bytes
pub const FCS_SIZE: usize = 64;

/// Number of echoes carried per pixel
pub const ECHOES: usize = 3;

/// `startColId` value marking the final fragment of a sub-frame.
pub const END_COLUMN: u8 = 255;

/// Last `subFrameId` of a frame.
pub const LAST_SUB_FRAME: u8 = 31;

/// Fixed-point scale of x/y/z: 9 fractional bits.
pub const COORDINATE_SCALE: f32 = 512.0;

/// Bit of the echo label carrying the echo-choice flag.
const ECHO_CHOICE_SHIFT: u8 = 6;

const _: () = assert!(HEADER_SIZE + PAYLOADS_PER_PACKET * PAYLOAD_SIZE + FCS_SIZE == PACKET_SIZE);

#[inline]
fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn be_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Convert a raw fixed-point coordinate to meters.
#[inline]
pub fn coordinate(raw: i16) -> f32 {
    raw as f32 / COORDINATE_SCALE
}

/// Extract the echo-choice flag (bit 6) from an echo label byte.
#[inline]
pub fn echo_choice(label: u8) -> bool {
    (label >> ECHO_CHOICE_SHIFT) & 0x01 != 0
}

/// GPS timestamp block of the frame header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpsTimestamp {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
    pub microsecond: u16,
}

impl GpsTimestamp {
    /// Size on the wire in bytes
    pub const SIZE: usize = 10;

    fn parse(data: &[u8]) -> Self {
        Self {
            year: data[0],
            month: data[1],
            day: data[2],
            hour: data[3],
            minute: data[4],
            second: data[5],
            millisecond: be_u16(data, 6),
            microsecond: be_u16(data, 8),
        }
    }

    /// Time of day in microseconds.
    pub fn micros_of_day(&self) -> u64 {
        let mut ts = self.hour as u64;
        ts = ts * 60 + self.minute as u64;
        ts = ts * 60 + self.second as u64;
        ts = ts * 1000 + self.millisecond as u64;
        ts * 1000 + self.microsecond as u64
    }
}

/// Parsed frame header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub pkt_head: u32,
    pub pkt_cnt: u16,
    pub pkt_length: u16,
    pub protocol_version: u16,
    pub gps_time: GpsTimestamp,
    pub time_sync_type: u8,
    pub time_sync_status: u8,
    pub product_id: u16,
    pub frame_id: u32,
    pub sub_frame_id: u8,
    pub start_col_id: u8,
    pub end_col_id: u8,
}

impl PacketHeader {
    /// Decode the header from the first [`HEADER_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HEADER_SIZE {
            return Err(Error::UnexpectedEnd(data.len()));
        }

        Ok(Self {
            pkt_head: be_u32(data, 0),
            pkt_cnt: be_u16(data, 4),
            pkt_length: be_u16(data, 6),
            protocol_version: be_u16(data, 8),
            gps_time: GpsTimestamp::parse(&data[10..10 + GpsTimestamp::SIZE]),
            time_sync_type: data[20],
            time_sync_status: data[21],
            product_id: be_u16(data, 22),
            frame_id: be_u32(data, 24),
            sub_frame_id: data[28],
            start_col_id: data[29],
            end_col_id: data[30],
        })
    }

    /// True for the explicit end-of-frame fragment.
    #[inline]
    pub fn is_frame_end(&self) -> bool {
        self.sub_frame_id == LAST_SUB_FRAME && self.start_col_id == END_COLUMN
    }

    /// Number of columns carried by this packet.
    ///
    /// The end-marker fragment carries a single real column; every other
    /// fragment carries five.
    #[inline]
    pub fn column_count(&self) -> usize {
        if self.start_col_id == END_COLUMN { 1 } else { 5 }
    }
}

/// One payload record: a single grid cell with up to three echoes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadEntry {
    pub x: [i16; ECHOES],
    pub y: [i16; ECHOES],
    pub z: [i16; ECHOES],
    pub dist: [u16; ECHOES],
    pub intensity: [u32; ECHOES],
    pub reflectivity: [u8; ECHOES],
    pub echo_label: [u8; ECHOES],
}

impl PayloadEntry {
    /// Decode a record from the first [`PAYLOAD_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < PAYLOAD_SIZE {
            return Err(Error::UnexpectedEnd(data.len()));
        }

        let mut entry = PayloadEntry::default();
        for echo in 0..ECHOES {
            entry.x[echo] = be_i16(data, echo * 2);
            entry.y[echo] = be_i16(data, 6 + echo * 2);
            entry.z[echo] = be_i16(data, 12 + echo * 2);
            entry.dist[echo] = be_u16(data, 18 + echo * 2);
            entry.intensity[echo] = be_u32(data, 24 + echo * 4);
            entry.reflectivity[echo] = data[36 + echo];
            entry.echo_label[echo] = data[39 + echo];
        }

        Ok(entry)
    }

    /// Coordinates of `echo` in meters.
    #[inline]
    pub fn position(&self, echo: usize) -> (f32, f32, f32) {
        (
            coordinate(self.x[echo]),
            coordinate(self.y[echo]),
            coordinate(self.z[echo]),
        )
    }

    /// Echo-choice flag of `echo`.
    #[inline]
    pub fn is_chosen(&self, echo: usize) -> bool {
        echo_choice(self.echo_label[echo])
    }
}

/// A validated, borrowed view over a complete packet.
#[derive(Clone, Copy, Debug)]
pub struct Packet<'a> {
    header: PacketHeader,
    data: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Validate the length of `data` and decode its header.
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() != PACKET_SIZE {
            return Err(Error::InvalidPacket(format!(
                "packet size {} bytes, expected {}",
                data.len(),
                PACKET_SIZE
            )));
        }

        let header = PacketHeader::parse(data)?;
        Ok(Self { header, data })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Decode payload record `index` (0..30).
    pub fn payload(&self, index: usize) -> Result<PayloadEntry, Error> {
        if index >= PAYLOADS_PER_PACKET {
            return Err(Error::InvalidPacket(format!(
                "payload index {} out of range",
                index
            )));
        }
        let start = HEADER_SIZE + index * PAYLOAD_SIZE;
        PayloadEntry::parse(&self.data[start..start + PAYLOAD_SIZE])
    }
}

/// Builder for synthetic packets, used by tests, benchmarks and replay tools.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    data: Vec<u8>,
}

impl PacketBuilder {
    /// Start a packet for `frame_id`, `sub_frame_id`, `start_col_id`.
    pub fn new(frame_id: u32, sub_frame_id: u8, start_col_id: u8) -> Self {
        let mut data = vec![0u8; PACKET_SIZE];
        data[4..6].copy_from_slice(&0u16.to_be_bytes());
        data[6..8].copy_from_slice(&(PACKET_SIZE as u16).to_be_bytes());
        data[24..28].copy_from_slice(&frame_id.to_be_bytes());
        data[28] = sub_frame_id;
        data[29] = start_col_id;
        data[30] = if start_col_id == END_COLUMN {
            END_COLUMN
        } else {
            start_col_id.saturating_add(4)
        };
        Self { data }
    }

    /// Set the packet counter.
    pub fn packet_count(mut self, count: u16) -> Self {
        self.data[4..6].copy_from_slice(&count.to_be_bytes());
        self
    }

    /// Set the GPS timestamp block.
    pub fn gps_time(mut self, time: GpsTimestamp) -> Self {
        let block = &mut self.data[10..10 + GpsTimestamp::SIZE];
        block[0] = time.year;
        block[1] = time.month;
        block[2] = time.day;
        block[3] = time.hour;
        block[4] = time.minute;
        block[5] = time.second;
        block[6..8].copy_from_slice(&time.millisecond.to_be_bytes());
        block[8..10].copy_from_slice(&time.microsecond.to_be_bytes());
        self
    }

    /// Write one echo of payload record `index` with raw fixed-point values.
    pub fn echo(
        mut self,
        index: usize,
        echo: usize,
        xyz: (i16, i16, i16),
        reflectivity: u8,
        chosen: bool,
    ) -> Self {
        let base = HEADER_SIZE + index * PAYLOAD_SIZE;
        let rec = &mut self.data[base..base + PAYLOAD_SIZE];
        rec[echo * 2..echo * 2 + 2].copy_from_slice(&xyz.0.to_be_bytes());
        rec[6 + echo * 2..6 + echo * 2 + 2].copy_from_slice(&xyz.1.to_be_bytes());
        rec[12 + echo * 2..12 + echo * 2 + 2].copy_from_slice(&xyz.2.to_be_bytes());
        rec[36 + echo] = reflectivity;
        rec[39 + echo] = if chosen { 1 << ECHO_CHOICE_SHIFT } else { 0 };
        self
    }

    /// Fill every record and echo with the same non-zero point.
    pub fn fill(mut self, xyz: (i16, i16, i16), reflectivity: u8) -> Self {
        for index in 0..PAYLOADS_PER_PACKET {
            for echo in 0..ECHOES {
                self = self.echo(index, echo, xyz, reflectivity, echo == 0);
            }
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}
