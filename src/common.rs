// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};
use tracing::{info, warn};

/// Default UDP port the sensors send to.
pub const DEFAULT_PORT: u16 = 6580;

/// Default multicast group of the sensors.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Kernel receive buffer requested for the socket, about 11k packets.
pub const DEFAULT_SOCKET_BUFFER: usize = 16 * 1024 * 1024;

/// Settings for the sensor-facing UDP socket.
#[derive(Clone, Debug, PartialEq)]
pub struct UdpConfig {
    pub port: u16,
    /// Multicast group to join, `None` for unicast only
    pub multicast: Option<Ipv4Addr>,
    /// Local interface address used for the multicast join
    pub interface: Ipv4Addr,
    /// Requested `SO_RCVBUF` in bytes
    pub socket_buffer: usize,
    /// Read timeout so the receive loop can observe shutdown
    pub read_timeout: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            multicast: Some(DEFAULT_MULTICAST_GROUP),
            interface: Ipv4Addr::UNSPECIFIED,
            socket_buffer: DEFAULT_SOCKET_BUFFER,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Bind the sensor socket: address reuse, receive buffer, optional
/// multicast membership and a read timeout.
pub fn bind_udp(config: &UdpConfig) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    if let Err(err) = socket.set_recv_buffer_size(config.socket_buffer) {
        warn!("setsockopt SO_RCVBUF failed: {}", err);
    }
    match socket.recv_buffer_size() {
        Ok(size) if size < config.socket_buffer => warn!(
            "socket receive buffer is {} bytes, requested {}",
            size, config.socket_buffer
        ),
        _ => {}
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    socket.bind(&SockAddr::from(addr))?;

    if let Some(group) = config.multicast {
        socket.join_multicast_v4(&group, &config.interface)?;
        info!(
            "joined multicast group {} on interface {}",
            group, config.interface
        );
    }

    socket.set_read_timeout(Some(config.read_timeout))?;
    info!("listening on udp port {}", config.port);

    Ok(socket.into())
}

#[cfg(target_os = "linux")]
pub fn set_process_priority() {
    let mut param = libc::sched_param { sched_priority: 10 };
    let pid = unsafe { libc::pthread_self() };
    let err = unsafe {
        libc::pthread_setschedparam(pid, libc::SCHED_FIFO, &mut param as *mut libc::sched_param)
    };
    if err != 0 {
        let err = std::io::Error::from_raw_os_error(err);
        warn!("unable to set udp_recv real-time fifo scheduler: {}", err);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_process_priority() {}
