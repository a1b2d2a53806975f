//! # manet-mesh
//!
//! The moving parts of the ad-hoc network: devices that learn routes by
//! distance-vector exchange, routers that switch their packets and federate
//! broadcasts one hop to their peers, the shared router registry, and the
//! transports that carry framed packets between them.
//!
//! Nodes run either as tokio tasks over a [`Network`] ([`RouterNode`],
//! [`DeviceNode`], [`launch::spawn_router`]) or inside the deterministic
//! [`Simulation`], which processes one delivery at a time.

pub mod device;
pub mod launch;
pub mod registry;
pub mod router;
pub mod simulation;
pub mod transport;

pub use device::{Device, DeviceNode, Outcome, Reaction};
pub use launch::{DevicePlan, RouterHandle, RouterPlan, plan_router, spawn_router};
pub use registry::{FileRegistry, MemoryRegistry, Registry, next_router_id, next_router_port};
pub use router::{Delivery, Dispatch, Router, RouterNode, Switch};
pub use simulation::{SimStats, Simulation};
pub use transport::{Listener, MemoryNetwork, Network, TcpNetwork};
