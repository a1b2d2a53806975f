//! Deterministic in-process simulation.
//!
//! Routers and devices live in one process and deliveries are processed one
//! at a time in FIFO order. Every delivery still goes through the wire codec,
//! so what a node sees is exactly what the TCP transport would hand it.
//! Peer routers are looked up through a [`MemoryRegistry`], the same way a
//! running router consults the shared registry file.
//!
//! ```ignore
//! let mut sim = Simulation::seeded(&config, 2)?;
//! sim.start();
//! let stats = sim.run_until_quiet(100_000)?;
//! println!("{} deliveries", stats.deliveries);
//! ```

use std::collections::{HashMap, VecDeque};

use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use manet_config::ManetConfig;
use manet_core::wire::decode_frame_with;
use manet_core::{
    DeviceId, Endpoint, Envelope, ManetError, PacketCodec, Result, RouterId,
};

use crate::device::{Device, Outcome};
use crate::launch::{RouterPlan, plan_router};
use crate::registry::{MemoryRegistry, Registry};
use crate::router::{Delivery, Router, Switch};

/// Address used for every node in a seeded simulation.
pub const SIM_ADDRESS: &str = "sim";

/// Counters collected while the simulation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Frames handed to a node (router or device).
    pub deliveries: usize,
    /// Router: packets switched to a single device.
    pub unicasts: usize,
    /// Router: packets broadcast to local devices.
    pub broadcasts: usize,
    /// Router: marked copies sent to peer routers.
    pub router_forwards: usize,
    pub discarded_by_range: usize,
    pub discarded_by_relevance: usize,
    /// Device: packets merged, whether or not the table changed.
    pub merged: usize,
    /// Device: merges that added or shortened a route.
    pub table_changes: usize,
    pub relayed: usize,
    pub unroutable: usize,
    /// Frames addressed to an endpoint nobody is bound to.
    pub undeliverable: usize,
    /// Frames the codec refused.
    pub dropped: usize,
}

/// A set of routers and devices exchanging packets through a FIFO queue.
#[derive(Debug, Default)]
pub struct Simulation {
    registry: MemoryRegistry,
    routers: HashMap<Endpoint, Router>,
    devices: HashMap<Endpoint, Device>,
    index: HashMap<DeviceId, Endpoint>,
    uplinks: HashMap<Endpoint, Endpoint>,
    queue: VecDeque<Delivery>,
    codec: PacketCodec,
    stats: SimStats,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan `routers` routers with `config.devices` each, as consecutive
    /// `manet router` launches would.
    pub fn seeded(config: &ManetConfig, routers: usize) -> Result<Self> {
        let mut sim = Self::new();
        sim.codec = PacketCodec::new(config.network.max_frame_bytes);
        for _ in 0..routers {
            let plan = plan_router(&sim.registry.list()?, SIM_ADDRESS, config)?;
            sim.add_plan(&plan)?;
        }
        Ok(sim)
    }

    pub fn add_router(&mut self, id: impl Into<RouterId>, endpoint: Endpoint) -> Result<()> {
        self.ensure_free(&endpoint)?;
        let router = Router::new(id, endpoint.clone());
        self.registry.append(router.record().clone())?;
        self.routers.insert(endpoint, router);
        Ok(())
    }

    /// Attach `device` at `endpoint` to the router with id `router_id`.
    pub fn add_device(&mut self, router_id: &str, device: Device, endpoint: Endpoint) -> Result<()> {
        self.ensure_free(&endpoint)?;
        let router = self
            .routers
            .values_mut()
            .find(|r| r.id() == router_id)
            .ok_or_else(|| ManetError::UnknownNode(router_id.to_string()))?;
        router.register_device(device.id(), endpoint.clone());
        self.uplinks.insert(endpoint.clone(), router.endpoint().clone());
        self.index.insert(device.id().to_string(), endpoint.clone());
        self.devices.insert(endpoint, device);
        Ok(())
    }

    pub fn add_plan(&mut self, plan: &RouterPlan) -> Result<()> {
        self.add_router(plan.record.id.clone(), plan.record.endpoint.clone())?;
        for device in &plan.devices {
            self.add_device(&plan.record.id, plan.device(device), device.record.endpoint.clone())?;
        }
        Ok(())
    }

    /// Queue every device's discovery broadcast, in device id order.
    pub fn start(&mut self) {
        let mut ids: Vec<&DeviceId> = self.index.keys().collect();
        ids.sort();
        for id in ids {
            let endpoint = &self.index[id];
            let (Some(device), Some(uplink)) = (self.devices.get(endpoint), self.uplinks.get(endpoint))
            else {
                continue;
            };
            self.queue.push_back(Delivery {
                endpoint: uplink.clone(),
                envelope: Envelope::new(device.discovery_packet()),
            });
        }
        debug!(queued = self.queue.len(), "simulation started");
    }

    /// Process one delivery. Returns `false` when the queue was empty.
    pub fn step(&mut self) -> bool {
        let Some(delivery) = self.queue.pop_front() else {
            return false;
        };

        let envelope = match self.round_trip(&delivery.envelope) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(to = %delivery.endpoint, error = %e, "frame dropped");
                self.stats.dropped += 1;
                return true;
            }
        };
        self.stats.deliveries += 1;

        if let Some(router) = self.routers.get(&delivery.endpoint) {
            let peers = if envelope.rebroadcast || router.is_unicast(&envelope) {
                Vec::new()
            } else {
                self.registry.list().unwrap_or_default()
            };
            let dispatch = router.dispatch(&envelope, &peers);
            match dispatch.switch {
                Switch::Unicast => self.stats.unicasts += 1,
                Switch::Broadcast { peers: forwarded, .. } => {
                    self.stats.broadcasts += 1;
                    self.stats.router_forwards += forwarded;
                }
            }
            self.queue.extend(dispatch.deliveries);
        } else if let Some(device) = self.devices.get_mut(&delivery.endpoint) {
            let reaction = device.handle(&envelope.packet);
            match reaction.outcome {
                Outcome::DiscardedByRange => self.stats.discarded_by_range += 1,
                Outcome::DiscardedByRelevance => self.stats.discarded_by_relevance += 1,
                Outcome::Merged { changed } => {
                    self.stats.merged += 1;
                    if changed {
                        self.stats.table_changes += 1;
                    }
                }
                Outcome::Relayed => self.stats.relayed += 1,
                Outcome::Unroutable => self.stats.unroutable += 1,
            }
            if let Some(uplink) = self.uplinks.get(&delivery.endpoint) {
                for packet in reaction.outgoing {
                    self.queue.push_back(Delivery {
                        endpoint: uplink.clone(),
                        envelope: Envelope::new(packet),
                    });
                }
            }
        } else {
            trace!(to = %delivery.endpoint, "no node bound");
            self.stats.undeliverable += 1;
        }
        true
    }

    /// Step until the queue drains. Fails if more than `limit` deliveries
    /// are needed.
    pub fn run_until_quiet(&mut self, limit: usize) -> Result<SimStats> {
        let mut processed = 0;
        while !self.queue.is_empty() {
            if processed >= limit {
                return Err(ManetError::NoQuiescence { limit });
            }
            self.step();
            processed += 1;
        }
        debug!(processed, deliveries = self.stats.deliveries, "simulation quiet");
        Ok(self.stats.clone())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.index.get(id).and_then(|ep| self.devices.get(ep))
    }

    /// All devices, sorted by id.
    pub fn devices(&self) -> Vec<&Device> {
        let mut devices: Vec<&Device> = self.devices.values().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    /// All routers, sorted by id.
    pub fn routers(&self) -> Vec<&Router> {
        let mut routers: Vec<&Router> = self.routers.values().collect();
        routers.sort_by(|a, b| a.id().cmp(b.id()));
        routers
    }

    /// Router that owns this device.
    pub fn home_router(&self, device_id: &str) -> Option<&Router> {
        self.index
            .get(device_id)
            .and_then(|ep| self.uplinks.get(ep))
            .and_then(|ep| self.routers.get(ep))
    }

    fn ensure_free(&self, endpoint: &Endpoint) -> Result<()> {
        if self.routers.contains_key(endpoint) || self.devices.contains_key(endpoint) {
            return Err(ManetError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{endpoint} is already bound"),
            )));
        }
        Ok(())
    }

    fn round_trip(&mut self, envelope: &Envelope) -> Result<Envelope> {
        let mut buf = BytesMut::new();
        <PacketCodec as Encoder<&Envelope>>::encode(&mut self.codec, envelope, &mut buf)?;
        Ok(decode_frame_with(&mut self.codec, &buf)?)
    }
}
