//! Device: a fixed-position node running a distance-vector protocol.
//!
//! Every packet a device receives goes through the same checks in order:
//!
//! 1. **Range.** The device must sit strictly inside the sender's radius.
//!    Otherwise the packet is discarded. Only the sender's radius counts, so
//!    links can be asymmetric.
//! 2. **Relevance.** Broadcasts are relevant to everyone. Directed packets
//!    are relevant only to the device named as next hop.
//! 3. **Relay or merge.** A packet addressed here whose target is anything
//!    but this device is relayed one hop further using the local table, or
//!    dropped when the target has no route. Broadcasts and packets targeted
//!    here are merged into the table.
//!
//! Hop counts per destination never increase, and a device never holds a
//! route to itself.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use manet_core::{
    Coordinate, DeviceId, Endpoint, Envelope, Packet, Result, RoutingEntry, RoutingTable,
    TableUpdate,
};

use crate::transport::Network;

/// What a device did with one incoming packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The device was not strictly inside the sender's radius.
    DiscardedByRange,
    /// A directed packet addressed to some other device.
    DiscardedByRelevance,
    /// Merged into the table; `changed` is true when any entry was added or
    /// shortened.
    Merged { changed: bool },
    /// Forwarded one hop closer to its target.
    Relayed,
    /// Addressed here for relay, but the target is not in the table.
    Unroutable,
}

/// The outcome of handling a packet plus the packets it produced.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub outcome: Outcome,
    pub outgoing: Vec<Packet>,
}

impl Reaction {
    fn quiet(outcome: Outcome) -> Self {
        Self {
            outcome,
            outgoing: Vec::new(),
        }
    }
}

/// Protocol state of a single device.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    coord: Coordinate,
    radius: u32,
    table: RoutingTable,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, coord: Coordinate, radius: u32) -> Self {
        Self {
            id: id.into(),
            coord,
            radius,
            table: RoutingTable::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn coord(&self) -> Coordinate {
        self.coord
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// The one-shot startup broadcast.
    pub fn discovery_packet(&self) -> Packet {
        Packet::discovery(self.id.clone(), self.coord, self.radius, self.table.clone())
    }

    /// Run one incoming packet through range, relevance, and relay/merge.
    pub fn handle(&mut self, packet: &Packet) -> Reaction {
        if !self.coord.within(&packet.sender_coord, packet.sender_radius) {
            trace!(
                device = %self.id,
                sender = %packet.sender_id,
                distance = self.coord.distance_to(&packet.sender_coord),
                radius = packet.sender_radius,
                "out of sender's range"
            );
            return Reaction::quiet(Outcome::DiscardedByRange);
        }

        if !packet.is_broadcast() && packet.next_hop_id != self.id {
            trace!(device = %self.id, next_hop = %packet.next_hop_id, "not addressed here");
            return Reaction::quiet(Outcome::DiscardedByRelevance);
        }

        if packet.next_hop_id == self.id && packet.target_id != self.id {
            return self.relay(packet);
        }

        self.merge(packet)
    }

    fn relay(&self, packet: &Packet) -> Reaction {
        let Some(entry) = self.table.get(&packet.target_id) else {
            debug!(device = %self.id, target = %packet.target_id, "no route for relay");
            return Reaction::quiet(Outcome::Unroutable);
        };

        debug!(
            device = %self.id,
            target = %packet.target_id,
            via = %entry.next_hop,
            hops = packet.hop_count.saturating_add(1),
            "relaying"
        );
        let forwarded = Packet::directed(
            self.id.clone(),
            self.coord,
            self.radius,
            entry.next_hop.clone(),
            packet.target_id.clone(),
            packet.sender_table.clone(),
            packet.hop_count.saturating_add(1),
        );
        Reaction {
            outcome: Outcome::Relayed,
            outgoing: vec![forwarded],
        }
    }

    fn merge(&mut self, packet: &Packet) -> Reaction {
        let before = self.table.clone();
        let mut outgoing = Vec::new();
        let sender = &packet.sender_id;

        if *sender != self.id && !self.table.contains(sender) {
            self.table
                .offer(sender, RoutingEntry::new(sender.clone(), packet.hop_count));
            debug!(device = %self.id, neighbor = %sender, "new neighbor");
        }

        for (destination, entry) in packet.sender_table.iter() {
            if *destination == self.id {
                continue;
            }
            let candidate = RoutingEntry::new(
                sender.clone(),
                entry.hop_count.saturating_add(packet.hop_count),
            );
            let hops = candidate.hop_count;
            match self.table.offer(destination, candidate) {
                TableUpdate::Added => {
                    debug!(device = %self.id, destination = %destination, via = %sender, hops, "learned route");
                    outgoing.push(Packet::directed(
                        self.id.clone(),
                        self.coord,
                        self.radius,
                        sender.clone(),
                        destination.clone(),
                        self.table.clone(),
                        1,
                    ));
                }
                TableUpdate::Improved { previous } => {
                    debug!(
                        device = %self.id,
                        destination = %destination,
                        via = %sender,
                        hops,
                        previous = previous.hop_count,
                        "shorter route"
                    );
                }
                TableUpdate::Rejected => {}
            }
        }

        let changed = self.table != before;
        if changed {
            debug!(device = %self.id, "routing table updated\n{}", self.table);
            for (destination, entry) in self.table.iter() {
                outgoing.push(Packet::directed(
                    self.id.clone(),
                    self.coord,
                    self.radius,
                    entry.next_hop.clone(),
                    destination.clone(),
                    self.table.clone(),
                    1,
                ));
            }
        }

        Reaction {
            outcome: Outcome::Merged { changed },
            outgoing,
        }
    }
}

/// A [`Device`] bound to a transport and its home router.
pub struct DeviceNode {
    device: Device,
    endpoint: Endpoint,
    router: Endpoint,
    network: Arc<dyn Network>,
    startup_delay: Duration,
}

impl DeviceNode {
    pub fn new(
        device: Device,
        endpoint: Endpoint,
        router: Endpoint,
        network: Arc<dyn Network>,
        startup_delay: Duration,
    ) -> Self {
        Self {
            device,
            endpoint,
            router,
            network,
            startup_delay,
        }
    }

    /// Bind, wait for the router, send one discovery, then handle packets
    /// until `cancel` fires. Returns the final device state.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<Device> {
        let mut listener = self.network.bind(&self.endpoint).await?;
        debug!(device = %self.device.id(), endpoint = %self.endpoint, "device listening");

        tokio::select! {
            _ = cancel.cancelled() => return Ok(self.device),
            _ = tokio::time::sleep(self.startup_delay) => {}
        }

        let discovery = self.device.discovery_packet();
        self.send(discovery).await;
        info!(
            device = %self.device.id(),
            coord = %self.device.coord(),
            radius = self.device.radius(),
            "discovery sent"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(envelope) => {
                        let reaction = self.device.handle(&envelope.packet);
                        for packet in reaction.outgoing {
                            self.send(packet).await;
                        }
                    }
                    Err(e) => debug!(device = %self.device.id(), error = %e, "dropped incoming packet"),
                },
            }
        }

        Ok(self.device)
    }

    async fn send(&self, packet: Packet) {
        if let Err(e) = self.network.send(&self.router, &Envelope::new(packet)).await {
            warn!(device = %self.device.id(), router = %self.router, error = %e, "send to router failed");
        }
    }
}
