// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction for the receive thread.
//!
//! This module provides a [`PacketSource`] trait that abstracts where
//! datagrams come from, enabling:
//!
//! - **Live operation**: Reading from a UDP socket
//! - **Testing**: Replaying in-memory packets
//! - **Pcap replay**: Reading from pcap files (with feature flag)
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_gridlidar::packet_source::{PacketSource, TestSource};
//!
//! let mut source = TestSource::new(SensorId(10), packets);
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     if let Some(datagram) = source.recv(&mut buf)? {
//!         // Process buf[..datagram.len] from datagram.sensor
//!     }
//! }
//! ```

use crate::{
    common::{self, UdpConfig},
    lidar::{Error, SensorId},
};
use std::{io::ErrorKind, net::UdpSocket};

/// Default per-datagram receive buffer, larger than any sensor packet.
pub const DEFAULT_RECV_BUFFER: usize = 2048;

/// Metadata of one received datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// Bytes written into the receive buffer
    pub len: usize,
    /// Sender identity
    pub sensor: SensorId,
}

/// Trait for packet sources.
///
/// Implementations provide datagrams from various sources (UDP, pcap, test
/// data).
pub trait PacketSource: Send {
    /// Receive the next datagram into `buf`.
    ///
    /// # Returns
    /// - `Ok(Some(datagram))` - a datagram was received
    /// - `Ok(None)` - nothing arrived before the source's timeout
    /// - `Err` - I/O or source error
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<Datagram>, Error>;

    /// Check if more packets are available.
    ///
    /// For infinite sources (like UDP), always returns `true`.
    /// For finite sources (test, pcap), returns `false` when exhausted.
    fn has_more(&self) -> bool;

    /// True for sources that cannot be paused, such as a socket.
    ///
    /// The pipeline drops packets from a live source when the queue is full
    /// and applies backpressure to any other source instead.
    fn is_live(&self) -> bool {
        true
    }
}

/// UDP socket packet source for live sensor operation.
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    /// Create a new UDP source from an existing socket.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind and configure the sensor socket.
    pub fn bind(config: &UdpConfig) -> Result<Self, Error> {
        Ok(Self::new(common::bind_udp(config)?))
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl PacketSource for UdpSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<Datagram>, Error> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) => Ok(Some(Datagram {
                len,
                sensor: SensorId::from_addr(addr.ip()),
            })),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn has_more(&self) -> bool {
        true // UDP sources are infinite
    }
}

/// Test packet source for unit testing.
///
/// Provides a sequence of pre-defined datagrams, each tagged with its
/// sender, for testing the pipeline without hardware.
pub struct TestSource {
    packets: Vec<(SensorId, Vec<u8>)>,
    index: usize,
    live: bool,
}

impl TestSource {
    /// Create a test source where every packet comes from `sensor`.
    pub fn new(sensor: SensorId, packets: Vec<Vec<u8>>) -> Self {
        Self::from_datagrams(packets.into_iter().map(|p| (sensor, p)).collect())
    }

    /// Create a test source from packets of mixed senders.
    pub fn from_datagrams(packets: Vec<(SensorId, Vec<u8>)>) -> Self {
        Self {
            packets,
            index: 0,
            live: false,
        }
    }

    /// Behave like a socket: the pipeline drops instead of waiting when the
    /// queue is full.
    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }

    /// Create an empty test source.
    pub fn empty() -> Self {
        Self::from_datagrams(Vec::new())
    }

    /// Reset the source to the beginning.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Get the number of packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Get the current index.
    pub fn current_index(&self) -> usize {
        self.index
    }
}

impl PacketSource for TestSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<Datagram>, Error> {
        let Some((sensor, packet)) = self.packets.get(self.index) else {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "no more packets",
            )));
        };

        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        self.index += 1;
        Ok(Some(Datagram {
            len,
            sensor: *sensor,
        }))
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::Ipv4Addr, time::Duration};

    #[test]
    fn test_test_source() {
        let packets = vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8, 9, 10], vec![11, 12]];
        let mut source = TestSource::new(SensorId(10), packets);

        assert!(source.has_more());
        assert_eq!(source.len(), 3);

        let mut buf = [0u8; 100];

        // First packet
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(datagram.len, 4);
        assert_eq!(datagram.sensor, SensorId(10));
        assert_eq!(&buf[..datagram.len], &[1, 2, 3, 4]);

        // Second packet
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], &[5, 6, 7, 8, 9, 10]);

        // Third packet
        assert!(source.has_more());
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], &[11, 12]);

        // No more
        assert!(!source.has_more());
        assert!(source.recv(&mut buf).is_err());
    }

    #[test]
    fn test_test_source_mixed_senders() {
        let mut source = TestSource::from_datagrams(vec![
            (SensorId(10), vec![1]),
            (SensorId(11), vec![2]),
        ]);
        let mut buf = [0u8; 8];
        assert_eq!(source.recv(&mut buf).unwrap().unwrap().sensor, SensorId(10));
        assert_eq!(source.recv(&mut buf).unwrap().unwrap().sensor, SensorId(11));
    }

    #[test]
    fn test_test_source_reset() {
        let mut source = TestSource::new(SensorId(1), vec![vec![1, 2], vec![3, 4]]);
        let mut buf = [0u8; 100];

        source.recv(&mut buf).unwrap();
        source.recv(&mut buf).unwrap();
        assert!(!source.has_more());

        source.reset();
        assert!(source.has_more());
        assert_eq!(source.current_index(), 0);

        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], &[1, 2]);
    }

    #[test]
    fn test_empty_test_source() {
        let mut source = TestSource::empty();
        assert!(!source.has_more());
        assert!(source.is_empty());

        let mut buf = [0u8; 100];
        assert!(source.recv(&mut buf).is_err());
    }

    #[test]
    fn test_liveness() {
        let source = TestSource::new(SensorId(1), vec![vec![1]]);
        assert!(!source.is_live());
        assert!(source.live().is_live());
    }

    #[test]
    fn test_buffer_truncation() {
        let mut source = TestSource::new(SensorId(1), vec![vec![1, 2, 3, 4, 5, 6, 7, 8]]);

        // Small buffer
        let mut buf = [0u8; 4];
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(datagram.len, 4);
        assert_eq!(&buf[..datagram.len], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_udp_source_loopback() {
        let config = UdpConfig {
            port: 0,
            multicast: None,
            socket_buffer: 64 * 1024,
            read_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let mut source = UdpSource::bind(&config).unwrap();
        let port = source.socket().local_addr().unwrap().port();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender.send_to(&[9, 8, 7], (Ipv4Addr::LOCALHOST, port)).unwrap();

        let mut buf = [0u8; DEFAULT_RECV_BUFFER];
        let datagram = source.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..datagram.len], &[9, 8, 7]);
        // 127.0.0.1 maps to sensor 1
        assert_eq!(datagram.sensor, SensorId(1));

        // Nothing else queued: timeout is not an error
        assert_eq!(source.recv(&mut buf).unwrap(), None);
        assert!(source.has_more());
        assert!(source.is_live());
    }
}
