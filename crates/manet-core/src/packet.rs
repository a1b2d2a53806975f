use serde::{Deserialize, Serialize};

use crate::types::{Coordinate, DeviceId, RoutingTable};
use crate::wire::CodecError;

/// The single message type exchanged between devices and routers.
///
/// A packet with an empty `next_hop_id` is a discovery broadcast. A packet
/// with a `next_hop_id` is a directed relay request that routers switch to
/// exactly that device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Packet {
    pub sender_id: DeviceId,
    pub sender_coord: Coordinate,
    pub sender_radius: u32,
    /// Device that should handle this packet next ("" for broadcasts).
    #[serde(default)]
    pub next_hop_id: DeviceId,
    /// Final destination ("" for broadcasts).
    #[serde(default)]
    pub target_id: DeviceId,
    /// Snapshot of the originator's routing table.
    pub sender_table: RoutingTable,
    pub hop_count: u32,
}

impl Packet {
    /// Build an undirected discovery broadcast.
    pub fn discovery(
        sender_id: impl Into<DeviceId>,
        sender_coord: Coordinate,
        sender_radius: u32,
        sender_table: RoutingTable,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_coord,
            sender_radius,
            next_hop_id: DeviceId::new(),
            target_id: DeviceId::new(),
            sender_table,
            hop_count: 1,
        }
    }

    /// Build a packet addressed to `target_id` by way of `next_hop_id`.
    pub fn directed(
        sender_id: impl Into<DeviceId>,
        sender_coord: Coordinate,
        sender_radius: u32,
        next_hop_id: impl Into<DeviceId>,
        target_id: impl Into<DeviceId>,
        sender_table: RoutingTable,
        hop_count: u32,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_coord,
            sender_radius,
            next_hop_id: next_hop_id.into(),
            target_id: target_id.into(),
            sender_table,
            hop_count,
        }
    }

    /// True for undirected discovery broadcasts.
    pub fn is_broadcast(&self) -> bool {
        self.next_hop_id.is_empty()
    }

    /// Check field-level invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.sender_id.is_empty() {
            return Err(CodecError::invalid("sender_id", "must not be empty"));
        }
        if self.hop_count == 0 {
            return Err(CodecError::invalid("hop_count", "must be at least 1"));
        }
        if self.next_hop_id.is_empty() && !self.target_id.is_empty() {
            return Err(CodecError::invalid(
                "target_id",
                "a target requires a next hop",
            ));
        }
        for (destination, entry) in self.sender_table.iter() {
            if destination.is_empty() {
                return Err(CodecError::invalid(
                    "sender_table",
                    "destination id must not be empty",
                ));
            }
            if entry.next_hop.is_empty() {
                return Err(CodecError::invalid(
                    "sender_table",
                    format!("entry for {destination} has no next hop"),
                ));
            }
            if entry.hop_count == 0 {
                return Err(CodecError::invalid(
                    "sender_table",
                    format!("entry for {destination} has a zero hop count"),
                ));
            }
        }
        Ok(())
    }
}

/// A packet plus the router-to-router rebroadcast marker.
///
/// The marker is set when a router forwards a broadcast to its peers; a peer
/// that receives a marked packet delivers it locally but never forwards it
/// again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub rebroadcast: bool,
    pub packet: Packet,
}

impl Envelope {
    pub fn new(packet: Packet) -> Self {
        Self {
            rebroadcast: false,
            packet,
        }
    }

    /// Copy of this envelope with the rebroadcast marker set.
    pub fn marked(&self) -> Self {
        Self {
            rebroadcast: true,
            packet: self.packet.clone(),
        }
    }
}

impl From<Packet> for Envelope {
    fn from(packet: Packet) -> Self {
        Self::new(packet)
    }
}
