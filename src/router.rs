// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Demultiplexing of packets to per-sensor decoders.
//!
//! Sensors are identified by the low byte of their IPv4 address. The first
//! packet from an unknown sensor creates its [`FrameDecoder`], configured
//! from the [`SensorRegistry`] or with a synthesized default.
//!
//! ```text
//!               ┌──────────────┐   .10  ┌───────────────────┐
//!  RawPacket ──►│ SourceRouter │ ─────► │ FrameDecoder (10) │
//!               │  resolve(id) │   .11  ├───────────────────┤
//!               └──────────────┘ ─────► │ FrameDecoder (11) │
//!                                       └───────────────────┘
//! ```
//!
//! The router belongs to a [`PipelineContext`] owned by the processing
//! thread; it is never shared, so it needs no locking.

use crate::{
    config::{DecoderConfig, SensorRegistry},
    decoder::{Diagnostics, FrameDecoder},
    lidar::{Error, SensorId},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::info;

/// Lazily populated map of sensor id to decoder.
pub struct SourceRouter {
    registry: SensorRegistry,
    config: DecoderConfig,
    decoders: HashMap<SensorId, FrameDecoder>,
}

impl SourceRouter {
    /// Create a router; `config` is validated once here for every decoder.
    pub fn new(registry: SensorRegistry, config: DecoderConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            decoders: HashMap::new(),
        })
    }

    /// Decoder for `id`, created on first use.
    pub fn resolve(&mut self, id: SensorId) -> &mut FrameDecoder {
        let registry = &self.registry;
        let config = &self.config;
        self.decoders.entry(id).or_insert_with(|| {
            let sensor = match registry.get(id) {
                Some(sensor) => {
                    info!("new sensor {}: {}", id, sensor);
                    sensor.clone()
                }
                None => {
                    let sensor = registry.lookup(id);
                    info!("new sensor {} not in configuration, using {}", id, sensor);
                    sensor
                }
            };
            FrameDecoder::with_validated(config.clone(), sensor)
        })
    }

    /// Decoder for `id` if one exists.
    pub fn get(&self, id: SensorId) -> Option<&FrameDecoder> {
        self.decoders.get(&id)
    }

    pub fn decoders(&self) -> impl Iterator<Item = (&SensorId, &FrameDecoder)> {
        self.decoders.iter()
    }

    /// Sensors seen so far, in ascending id order.
    pub fn sensors(&self) -> Vec<SensorId> {
        let mut ids: Vec<_> = self.decoders.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Diagnostics of every decoder, keyed by sensor.
    pub fn diagnostics(&self) -> BTreeMap<SensorId, Diagnostics> {
        self.decoders
            .iter()
            .map(|(id, decoder)| (*id, decoder.diagnostics()))
            .collect()
    }
}

/// Counters shared between the receive and processing threads.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub rejected: AtomicU64,
    pub frames_completed: AtomicU64,
    pub recv_errors: AtomicU64,
}

impl PipelineStats {
    #[inline]
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.load(Ordering::Relaxed)
    }

    pub fn recv_errors(&self) -> u64 {
        self.recv_errors.load(Ordering::Relaxed)
    }
}

/// Everything the processing thread owns: the router and a handle on the
/// shared counters. Several pipelines can run side by side, each with its
/// own context.
pub struct PipelineContext {
    pub router: SourceRouter,
    pub stats: Arc<PipelineStats>,
}

impl PipelineContext {
    pub fn new(router: SourceRouter) -> Self {
        Self {
            router,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Context with the built-in sensor table and default decoder settings.
    pub fn with_defaults() -> Self {
        Self::new(SourceRouter {
            registry: SensorRegistry::builtin(),
            config: DecoderConfig::default(),
            decoders: HashMap::new(),
        })
    }
}
