use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a device, e.g. `"R1D7"`.
pub type DeviceId = String;

/// Unique identifier for a router, e.g. `"R1"`.
pub type RouterId = String;

/// A fixed position on the simulation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i64,
    pub y: i64,
}

impl Coordinate {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another coordinate.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        (self.squared_distance_to(other) as f64).sqrt()
    }

    /// Whether `other` lies strictly inside a circle of `radius` around us.
    ///
    /// Compared on squared integers so the boundary case (distance exactly
    /// equal to the radius) is excluded without floating point error.
    pub fn within(&self, other: &Coordinate, radius: u32) -> bool {
        let r = u128::from(radius);
        self.squared_distance_to(other) < r * r
    }

    fn squared_distance_to(&self, other: &Coordinate) -> u128 {
        let dx = u128::from(self.x.abs_diff(other.x));
        let dy = u128::from(self.y.abs_diff(other.y));
        (dx * dx).saturating_add(dy * dy)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A transport address: host plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A router's record of one of its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub endpoint: Endpoint,
}

impl DeviceRecord {
    pub fn new(id: impl Into<DeviceId>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
        }
    }
}

/// One row of the shared router registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterRecord {
    pub id: RouterId,
    pub endpoint: Endpoint,
}

impl RouterRecord {
    pub fn new(id: impl Into<RouterId>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
        }
    }
}

/// The best known way to reach one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    /// Neighbor to hand the packet to.
    pub next_hop: DeviceId,
    /// Number of hops to the destination, always at least 1.
    pub hop_count: u32,
}

impl RoutingEntry {
    pub fn new(next_hop: impl Into<DeviceId>, hop_count: u32) -> Self {
        Self {
            next_hop: next_hop.into(),
            hop_count,
        }
    }
}

/// Result of offering a candidate route to a [`RoutingTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableUpdate {
    /// The destination was unknown and has been added.
    Added,
    /// The candidate was strictly shorter and replaced this entry.
    Improved { previous: RoutingEntry },
    /// The candidate was not shorter; the table is unchanged.
    Rejected,
}

/// Destination-keyed routing table.
///
/// Hop counts for a destination never increase: [`RoutingTable::offer`] only
/// accepts unknown destinations or strictly shorter paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTable(BTreeMap<DeviceId, RoutingEntry>);

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination: &str) -> Option<&RoutingEntry> {
        self.0.get(destination)
    }

    pub fn contains(&self, destination: &str) -> bool {
        self.0.contains_key(destination)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &RoutingEntry)> {
        self.0.iter()
    }

    pub fn destinations(&self) -> impl Iterator<Item = &DeviceId> {
        self.0.keys()
    }

    /// Offer a candidate route and keep it only if it is new or strictly shorter.
    pub fn offer(&mut self, destination: &str, candidate: RoutingEntry) -> TableUpdate {
        match self.0.get_mut(destination) {
            None => {
                self.0.insert(destination.to_string(), candidate);
                TableUpdate::Added
            }
            Some(current) if candidate.hop_count < current.hop_count => {
                let previous = std::mem::replace(current, candidate);
                TableUpdate::Improved { previous }
            }
            Some(_) => TableUpdate::Rejected,
        }
    }
}

impl FromIterator<(DeviceId, RoutingEntry)> for RoutingTable {
    fn from_iter<I: IntoIterator<Item = (DeviceId, RoutingEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "  (empty)");
        }
        let mut first = true;
        for (destination, entry) in &self.0 {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(
                f,
                "  {destination:<10} via {:<10} {} hop(s)",
                entry.next_hop, entry.hop_count
            )?;
        }
        Ok(())
    }
}
