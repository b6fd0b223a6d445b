// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Offline replay of captured sensor traffic.
//!
//! [`PcapSource`] loads a legacy pcap or pcapng capture into memory and
//! serves its UDP payloads through [`PacketSource`]. Each payload keeps the
//! sender identity taken from its IP source address, so captures of several
//! sensors replay through the same router as live traffic.
//!
//! ```ignore
//! use edgefirst_gridlidar::{PcapSource, packet_source::PacketSource};
//!
//! let mut source = PcapSource::from_file("sensor_data.pcap", Some(6580))?;
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     if let Some(datagram) = source.recv(&mut buf)? {
//!         // buf[..datagram.len] from datagram.sensor
//!     }
//! }
//! ```

use crate::{
    lidar::{Error, SensorId},
    packet_source::{Datagram, PacketSource},
};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::{Block, PcapBlockOwned, PcapError, create_reader, traits::PcapReaderIterator};
use std::{net::IpAddr, path::Path};
use tracing::{debug, warn};

/// One captured UDP payload and its sender.
#[derive(Clone)]
struct ExtractedPacket {
    sensor: SensorId,
    payload: Vec<u8>,
}

/// In-memory capture served as a finite [`PacketSource`].
///
/// Replay is not live: the pipeline waits for queue space instead of
/// dropping packets.
pub struct PcapSource {
    packets: Vec<ExtractedPacket>,
    index: usize,
}

impl PcapSource {
    /// Load a capture file, keeping UDP datagrams whose source or
    /// destination port equals `port` (all UDP when `None`).
    pub fn from_file<P: AsRef<Path>>(path: P, port: Option<u16>) -> Result<Self, Error> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(&data, port)
    }

    /// Load a capture already in memory. The format (pcap or pcapng) is
    /// detected from its magic number.
    pub fn from_bytes(data: &[u8], port: Option<u16>) -> Result<Self, Error> {
        // The reader buffer covers the whole capture, so a refill adds no
        // data: failing again after one means the file is truncated.
        let mut reader = create_reader(data.len(), data)
            .map_err(|e| Error::InvalidPacket(format!("unrecognized capture format: {:?}", e)))?;

        let mut packets = Vec::new();
        let mut skipped = 0usize;
        let mut refilled = false;
        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    refilled = false;
                    if let Some(frame) = captured_frame(&block) {
                        match Self::extract_udp_payload(frame, port) {
                            Some(packet) => packets.push(packet),
                            None => skipped += 1,
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(e) if refilled => {
                    warn!("capture truncated after {} packets: {:?}", packets.len(), e);
                    break;
                }
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| Error::InvalidPacket(format!("capture read error: {:?}", e)))?;
                    refilled = true;
                }
                Err(e) => {
                    return Err(Error::InvalidPacket(format!("capture parse error: {:?}", e)));
                }
            }
        }

        debug!(
            "pcap: {} udp payloads, {} frames skipped",
            packets.len(),
            skipped
        );
        Ok(Self { packets, index: 0 })
    }

    /// Decode an Ethernet frame down to its UDP payload.
    fn extract_udp_payload(frame: &[u8], port: Option<u16>) -> Option<ExtractedPacket> {
        let sliced = SlicedPacket::from_ethernet(frame).ok()?;

        let source = match &sliced.net {
            Some(NetSlice::Ipv4(ipv4)) => IpAddr::V4(ipv4.header().source_addr()),
            Some(NetSlice::Ipv6(ipv6)) => IpAddr::V6(ipv6.header().source_addr()),
            _ => return None,
        };
        let Some(TransportSlice::Udp(udp)) = &sliced.transport else {
            return None;
        };

        if let Some(port) = port {
            if udp.source_port() != port && udp.destination_port() != port {
                return None;
            }
        }

        let payload = udp.payload();
        if payload.is_empty() {
            return None;
        }

        Some(ExtractedPacket {
            sensor: SensorId::from_addr(source),
            payload: payload.to_vec(),
        })
    }

    /// Rewind to the first packet.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Packets not yet served.
    pub fn remaining(&self) -> usize {
        self.packets.len().saturating_sub(self.index)
    }
}

/// Link-layer bytes of a packet block; `None` for headers and metadata.
fn captured_frame<'a>(block: &PcapBlockOwned<'a>) -> Option<&'a [u8]> {
    match block {
        PcapBlockOwned::Legacy(packet) => Some(packet.data),
        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => Some(epb.data),
        PcapBlockOwned::NG(Block::SimplePacket(spb)) => Some(spb.data),
        _ => None,
    }
}

impl PacketSource for PcapSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<Datagram>, Error> {
        let Some(packet) = self.packets.get(self.index) else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "capture exhausted",
            )));
        };

        let len = packet.payload.len().min(buf.len());
        buf[..len].copy_from_slice(&packet.payload[..len]);
        self.index += 1;
        Ok(Some(Datagram {
            len,
            sensor: packet.sensor,
        }))
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid legacy PCAP header (little-endian)
    const PCAP_HEADER: [u8; 24] = [
        0xd4, 0xc3, 0xb2, 0xa1, // Magic number (little-endian)
        0x02, 0x00, // Major version
        0x04, 0x00, // Minor version
        0x00, 0x00, 0x00, 0x00, // Timezone
        0x00, 0x00, 0x00, 0x00, // Timestamp accuracy
        0xff, 0xff, 0x00, 0x00, // Snap length
        0x01, 0x00, 0x00, 0x00, // Network type (Ethernet)
    ];

    // Create a minimal UDP packet with Ethernet + IPv4 + UDP headers
    fn make_udp_packet(src_host: u8, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let udp_len = 8 + payload.len();
        let ip_len = 20 + udp_len;
        let total_len = 14 + ip_len; // Ethernet header is 14 bytes

        let mut packet = Vec::with_capacity(total_len);

        // Ethernet header (14 bytes)
        packet.extend_from_slice(&[0x00; 6]); // Dst MAC
        packet.extend_from_slice(&[0x00; 6]); // Src MAC
        packet.extend_from_slice(&[0x08, 0x00]); // EtherType: IPv4

        // IPv4 header (20 bytes, no options)
        packet.push(0x45); // Version + IHL
        packet.push(0x00); // DSCP + ECN
        packet.extend_from_slice(&(ip_len as u16).to_be_bytes()); // Total length
        packet.extend_from_slice(&[0x00, 0x00]); // Identification
        packet.extend_from_slice(&[0x00, 0x00]); // Flags + Fragment offset
        packet.push(0x40); // TTL
        packet.push(0x11); // Protocol: UDP
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum (0 for test)
        packet.extend_from_slice(&[192, 168, 1, src_host]); // Src IP
        packet.extend_from_slice(&[239, 255, 0, 1]); // Dst IP

        // UDP header (8 bytes)
        packet.extend_from_slice(&src_port.to_be_bytes());
        packet.extend_from_slice(&dst_port.to_be_bytes());
        packet.extend_from_slice(&(udp_len as u16).to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum (0 for test)

        // Payload
        packet.extend_from_slice(payload);

        packet
    }

    // Create a PCAP packet record
    fn make_pcap_record(data: &[u8]) -> Vec<u8> {
        let len = data.len() as u32;
        let mut record = Vec::with_capacity(16 + data.len());

        // Packet record header (16 bytes)
        record.extend_from_slice(&[0x00; 4]); // Timestamp seconds
        record.extend_from_slice(&[0x00; 4]); // Timestamp microseconds
        record.extend_from_slice(&len.to_le_bytes()); // Captured length
        record.extend_from_slice(&len.to_le_bytes()); // Original length

        // Packet data
        record.extend_from_slice(data);

        record
    }

    fn make_pcap(packets: &[Vec<u8>]) -> Vec<u8> {
        let mut pcap_data = PCAP_HEADER.to_vec();
        for packet in packets {
            pcap_data.extend_from_slice(&make_pcap_record(packet));
        }
        pcap_data
    }

    #[test]
    fn test_extract_udp_payload() {
        let payload = b"test payload";
        let packet = make_udp_packet(10, 40000, 6580, payload);

        let extracted = PcapSource::extract_udp_payload(&packet, None).unwrap();
        assert_eq!(extracted.payload, payload);
        assert_eq!(extracted.sensor, SensorId(10));
    }

    #[test]
    fn test_extract_udp_payload_port_filter() {
        let payload = b"test payload";
        let packet = make_udp_packet(10, 40000, 6580, payload);

        // Match source port
        let extracted = PcapSource::extract_udp_payload(&packet, Some(40000)).unwrap();
        assert_eq!(extracted.payload, payload);

        // Match destination port
        let extracted = PcapSource::extract_udp_payload(&packet, Some(6580)).unwrap();
        assert_eq!(extracted.payload, payload);

        // No match
        let extracted = PcapSource::extract_udp_payload(&packet, Some(9999));
        assert!(extracted.is_none());
    }

    #[test]
    fn test_pcap_source_from_bytes() {
        let pcap_data = make_pcap(&[make_udp_packet(10, 40000, 6580, b"hello world")]);

        let source = PcapSource::from_bytes(&pcap_data, None).unwrap();
        assert_eq!(source.len(), 1);
        assert!(!source.is_empty());
    }

    #[test]
    fn test_pcap_source_port_filter() {
        let pcap_data = make_pcap(&[
            make_udp_packet(10, 40000, 6580, b"sensor traffic"),
            make_udp_packet(10, 40000, 7788, b"other traffic"),
        ]);

        let source = PcapSource::from_bytes(&pcap_data, Some(6580)).unwrap();
        assert_eq!(source.len(), 1);

        // No filter - both packets
        let source = PcapSource::from_bytes(&pcap_data, None).unwrap();
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_pcap_source_recv() {
        let pcap_data = make_pcap(&[
            make_udp_packet(10, 40000, 6580, b"front"),
            make_udp_packet(11, 40000, 6580, b"rear"),
        ]);

        let mut source = PcapSource::from_bytes(&pcap_data, None).unwrap();
        assert!(source.has_more());

        let mut buf = [0u8; 100];
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], b"front");
        assert_eq!(datagram.sensor, SensorId(10));

        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], b"rear");
        assert_eq!(datagram.sensor, SensorId(11));
        assert!(!source.has_more());
    }

    // Section header, Ethernet interface description, one enhanced packet
    // block per frame
    fn make_pcapng(packets: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        for word in [0x0A0D0D0Au32, 28, 0x1A2B3C4D] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&(-1i64).to_le_bytes());
        data.extend_from_slice(&28u32.to_le_bytes());

        for word in [1u32, 20] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        data.extend_from_slice(&1u16.to_le_bytes()); // Ethernet
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0xffffu32.to_le_bytes());
        data.extend_from_slice(&20u32.to_le_bytes());

        for packet in packets {
            let padded = packet.len().div_ceil(4) * 4;
            let total = (32 + padded) as u32;
            let len = packet.len() as u32;
            for word in [6u32, total, 0, 0, 0, len, len] {
                data.extend_from_slice(&word.to_le_bytes());
            }
            data.extend_from_slice(packet);
            data.resize(data.len() + padded - packet.len(), 0);
            data.extend_from_slice(&total.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_pcapng_source() {
        let data = make_pcapng(&[
            make_udp_packet(10, 40000, 6580, b"front"),
            make_udp_packet(12, 40000, 7788, b"other"),
            make_udp_packet(11, 40000, 6580, b"rear!"),
        ]);

        let mut source = PcapSource::from_bytes(&data, Some(6580)).unwrap();
        assert_eq!(source.len(), 2);

        let mut buf = [0u8; 64];
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], b"front");
        assert_eq!(datagram.sensor, SensorId(10));
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], b"rear!");
        assert_eq!(datagram.sensor, SensorId(11));
    }

    #[test]
    fn test_truncated_capture_keeps_complete_records() {
        let mut data = make_pcap(&[
            make_udp_packet(10, 40000, 6580, b"whole"),
            make_udp_packet(10, 40000, 6580, b"cut short"),
        ]);
        data.truncate(data.len() - 4);

        let source = PcapSource::from_bytes(&data, None).unwrap();
        assert_eq!(source.len(), 1);
        assert!(!source.is_live());
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(PcapSource::from_bytes(&[0u8; 64], None).is_err());
    }

    #[test]
    fn test_pcap_source_reset() {
        let pcap_data = make_pcap(&[make_udp_packet(10, 40000, 6580, b"test")]);

        let mut source = PcapSource::from_bytes(&pcap_data, None).unwrap();
        let mut buf = [0u8; 100];

        source.recv(&mut buf).unwrap();
        assert!(!source.has_more());

        source.reset();
        assert!(source.has_more());
        assert_eq!(source.current_index(), 0);
    }

    #[test]
    fn test_pcap_source_empty() {
        let source = PcapSource::from_bytes(&PCAP_HEADER, None).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.len(), 0);
        assert!(!source.has_more());
    }

    #[test]
    fn test_pcap_source_exhausted() {
        let mut source = PcapSource::from_bytes(&PCAP_HEADER, None).unwrap();

        let mut buf = [0u8; 100];
        assert!(source.recv(&mut buf).is_err());
    }

    #[test]
    fn test_remaining_packets() {
        let packet = make_udp_packet(10, 40000, 6580, b"test");
        let pcap_data = make_pcap(&[packet.clone(), packet.clone(), packet]);

        let mut source = PcapSource::from_bytes(&pcap_data, None).unwrap();
        assert_eq!(source.remaining(), 3);

        source.index = 1;
        assert_eq!(source.remaining(), 2);

        source.index = 3;
        assert_eq!(source.remaining(), 0);
    }
}
