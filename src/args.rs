// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    common::{DEFAULT_SOCKET_BUFFER, UdpConfig},
    config::{DecoderConfig, EchoFilter, FileConfig},
    pipeline::PipelineConfig,
};
use clap::Parser;
use std::{net::Ipv4Addr, path::PathBuf, time::Duration};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// UDP port the sensors send sub-frame packets to
    #[arg(long, env, default_value = "6580")]
    pub port: u16,

    /// Multicast group to join
    #[arg(long, env, default_value = "239.255.0.1")]
    pub multicast: Ipv4Addr,

    /// Receive unicast only, do not join the multicast group
    #[arg(long, env)]
    pub no_multicast: bool,

    /// Local interface address used for the multicast join
    #[arg(long, env, default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Receive buffer per datagram in bytes, larger than one packet
    #[arg(long, env, default_value = "2048")]
    pub recv_buffer: usize,

    /// Kernel socket receive buffer (SO_RCVBUF) in bytes
    #[arg(long, env, default_value_t = DEFAULT_SOCKET_BUFFER)]
    pub socket_buffer: usize,

    /// Packet queue capacity between the receive and decode threads
    #[arg(long, env, default_value = "5000")]
    pub capacity: usize,

    /// JSON configuration file with the sensor table and decoder settings
    #[arg(long, env)]
    pub config: Option<PathBuf>,

    /// Root directory for saved PLY files
    #[arg(long, env, default_value = "point_clouds")]
    pub output: PathBuf,

    /// Save every Nth completed frame
    #[arg(long, env, default_value = "1")]
    pub save_interval: u64,

    /// Do not save point clouds, only log them
    #[arg(long, env)]
    pub no_save: bool,

    /// Echo selection: all, flagged, or a single echo 1, 2 or 3.
    /// Overrides the configuration file.
    #[arg(long, env)]
    pub echo_filter: Option<EchoFilter>,

    /// Request real-time scheduling for the receive thread
    #[arg(long, env)]
    pub realtime: bool,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// Replay a pcap file instead of listening on the network
    #[cfg(feature = "pcap")]
    #[arg(long, env)]
    pub pcap: Option<PathBuf>,
}

impl Args {
    pub fn udp_config(&self) -> UdpConfig {
        UdpConfig {
            port: self.port,
            multicast: (!self.no_multicast).then_some(self.multicast),
            interface: self.interface,
            socket_buffer: self.socket_buffer,
            read_timeout: Duration::from_secs(1),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            capacity: self.capacity,
            recv_buffer: self.recv_buffer,
            realtime: self.realtime,
        }
    }

    /// Decoder settings from the file with command-line overrides applied.
    pub fn decoder_config(&self, file: &FileConfig) -> DecoderConfig {
        let mut config = file.decoder.clone();
        if let Some(filter) = self.echo_filter {
            config.echo_filter = filter;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["gridlidar"]).unwrap();
        assert_eq!(args.port, 6580);
        assert_eq!(args.capacity, 5000);
        assert_eq!(args.recv_buffer, 2048);
        assert_eq!(args.save_interval, 1);
        assert_eq!(args.echo_filter, None);

        let udp = args.udp_config();
        assert_eq!(udp.multicast, Some(Ipv4Addr::new(239, 255, 0, 1)));
        assert_eq!(udp.socket_buffer, DEFAULT_SOCKET_BUFFER);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "gridlidar",
            "--port",
            "7000",
            "--no-multicast",
            "--echo-filter",
            "flagged",
            "--capacity",
            "64",
        ])
        .unwrap();
        assert!(args.udp_config().multicast.is_none());
        assert_eq!(args.pipeline_config().capacity, 64);

        let config = args.decoder_config(&FileConfig::default());
        assert_eq!(config.echo_filter, EchoFilter::Flagged);
    }

    #[test]
    fn test_recv_buffer_at_packet_size_rejected() {
        let args = Args::try_parse_from(["gridlidar", "--recv-buffer", "1418"]).unwrap();
        assert!(args.pipeline_config().validate().is_err());

        let args = Args::try_parse_from(["gridlidar", "--recv-buffer", "1500"]).unwrap();
        assert!(args.pipeline_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_echo_filter() {
        assert!(Args::try_parse_from(["gridlidar", "--echo-filter", "4"]).is_err());
    }
}
