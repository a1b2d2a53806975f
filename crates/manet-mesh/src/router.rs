//! Router: a local packet switch plus one hop of federation.
//!
//! A packet whose `next_hop_id` names a local device is switched to that
//! device alone. Anything else is broadcast to every local device except the
//! sender and, unless it already carries the rebroadcast marker, forwarded
//! once to every other registered router with the marker set.
//!
//! The single marker bit only bounds flooding to the home router plus one
//! hop of peers. Routers further away never see the packet, and a cyclic
//! peer graph is not protected against in general.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use manet_core::{DeviceId, DeviceRecord, Endpoint, Envelope, Result, RouterId, RouterRecord};

use crate::registry::Registry;
use crate::transport::Network;

/// One outgoing frame and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub endpoint: Endpoint,
    pub envelope: Envelope,
}

/// How a router handled one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Delivered to the single local device named as next hop.
    Unicast,
    /// Delivered to `local` devices and forwarded to `peers` routers.
    Broadcast { local: usize, peers: usize },
}

/// The deliveries produced by [`Router::dispatch`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub switch: Switch,
    pub deliveries: Vec<Delivery>,
}

/// Switching state for one router: its identity and its device map.
#[derive(Debug, Clone)]
pub struct Router {
    record: RouterRecord,
    devices: HashMap<DeviceId, Endpoint>,
}

impl Router {
    pub fn new(id: impl Into<RouterId>, endpoint: Endpoint) -> Self {
        Self {
            record: RouterRecord::new(id, endpoint),
            devices: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.record.endpoint
    }

    pub fn record(&self) -> &RouterRecord {
        &self.record
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.devices.get(id)
    }

    /// Add a device to the local map. A repeated id silently replaces the
    /// previous endpoint; the old one is returned.
    pub fn register_device(&mut self, id: impl Into<DeviceId>, endpoint: Endpoint) -> Option<Endpoint> {
        let id = id.into();
        debug!(router = %self.record.id, device = %id, endpoint = %endpoint, "registered device");
        self.devices.insert(id, endpoint)
    }

    pub fn register(&mut self, record: DeviceRecord) -> Option<Endpoint> {
        self.register_device(record.id, record.endpoint)
    }

    /// True when this packet will be switched to a single local device.
    pub fn is_unicast(&self, envelope: &Envelope) -> bool {
        let next_hop = &envelope.packet.next_hop_id;
        !next_hop.is_empty() && self.devices.contains_key(next_hop)
    }

    /// Decide where one packet goes. `peers` is the registry listing; this
    /// router's own row is skipped.
    pub fn dispatch(&self, envelope: &Envelope, peers: &[RouterRecord]) -> Dispatch {
        let packet = &envelope.packet;

        if let Some(endpoint) = self
            .devices
            .get(&packet.next_hop_id)
            .filter(|_| !packet.next_hop_id.is_empty())
        {
            trace!(router = %self.record.id, next_hop = %packet.next_hop_id, "unicast");
            return Dispatch {
                switch: Switch::Unicast,
                deliveries: vec![Delivery {
                    endpoint: endpoint.clone(),
                    envelope: Envelope::new(packet.clone()),
                }],
            };
        }

        let mut deliveries: Vec<Delivery> = self
            .devices
            .iter()
            .filter(|(id, _)| **id != packet.sender_id)
            .map(|(_, endpoint)| Delivery {
                endpoint: endpoint.clone(),
                envelope: Envelope::new(packet.clone()),
            })
            .collect();
        deliveries.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        let local = deliveries.len();

        let mut forwarded = 0;
        if !envelope.rebroadcast {
            let marked = envelope.marked();
            for peer in peers.iter().filter(|p| p.id != self.record.id) {
                deliveries.push(Delivery {
                    endpoint: peer.endpoint.clone(),
                    envelope: marked.clone(),
                });
                forwarded += 1;
            }
        }

        trace!(router = %self.record.id, local, peers = forwarded, "broadcast");
        Dispatch {
            switch: Switch::Broadcast {
                local,
                peers: forwarded,
            },
            deliveries,
        }
    }
}

/// A [`Router`] bound to a transport and the shared registry.
pub struct RouterNode {
    router: Router,
    network: Arc<dyn Network>,
    registry: Arc<dyn Registry>,
}

impl RouterNode {
    pub fn new(router: Router, network: Arc<dyn Network>, registry: Arc<dyn Registry>) -> Self {
        Self {
            router,
            network,
            registry,
        }
    }

    /// Bind, join the registry, and switch packets until `cancel` fires.
    ///
    /// On cancellation the router removes its registry row and returns its
    /// final state. Packet-level failures are logged and skipped.
    pub async fn run(self, cancel: CancellationToken) -> Result<Router> {
        let mut listener = self.network.bind(self.router.endpoint()).await?;
        self.registry.append(self.router.record().clone())?;
        info!(
            router = %self.router.id(),
            endpoint = %self.router.endpoint(),
            devices = self.router.device_count(),
            "router started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(envelope) => self.handle(envelope).await,
                    Err(e) => debug!(router = %self.router.id(), error = %e, "dropped incoming packet"),
                },
            }
        }

        info!(router = %self.router.id(), "closing down");
        if let Err(e) = self.registry.remove(self.router.id()) {
            warn!(router = %self.router.id(), error = %e, "failed to leave registry");
        }
        Ok(self.router)
    }

    async fn handle(&self, envelope: Envelope) {
        debug!(
            router = %self.router.id(),
            sender = %envelope.packet.sender_id,
            next_hop = %envelope.packet.next_hop_id,
            target = %envelope.packet.target_id,
            rebroadcast = envelope.rebroadcast,
            "received packet"
        );

        let peers = if envelope.rebroadcast || self.router.is_unicast(&envelope) {
            Vec::new()
        } else {
            self.registry.list().unwrap_or_else(|e| {
                warn!(router = %self.router.id(), error = %e, "failed to read registry");
                Vec::new()
            })
        };

        let dispatch = self.router.dispatch(&envelope, &peers);
        for delivery in &dispatch.deliveries {
            if let Err(e) = self.network.send(&delivery.endpoint, &delivery.envelope).await {
                debug!(
                    router = %self.router.id(),
                    to = %delivery.endpoint,
                    error = %e,
                    "delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::transport::MemoryNetwork;
    use manet_core::{Coordinate, Packet, RoutingTable};

    fn router() -> Router {
        let mut r = Router::new("R1", Endpoint::new("mem", 5000));
        r.register_device("R1D1", Endpoint::new("mem", 5001));
        r.register_device("R1D2", Endpoint::new("mem", 5002));
        r.register_device("R1D3", Endpoint::new("mem", 5003));
        r
    }

    fn peers() -> Vec<RouterRecord> {
        vec![
            RouterRecord::new("R1", Endpoint::new("mem", 5000)),
            RouterRecord::new("R2", Endpoint::new("mem", 6000)),
            RouterRecord::new("R3", Endpoint::new("mem", 7000)),
        ]
    }

    fn discovery(sender: &str) -> Envelope {
        Envelope::new(Packet::discovery(
            sender,
            Coordinate::new(0, 0),
            10,
            RoutingTable::new(),
        ))
    }

    fn directed(sender: &str, next_hop: &str, target: &str) -> Envelope {
        Envelope::new(Packet::directed(
            sender,
            Coordinate::new(0, 0),
            10,
            next_hop,
            target,
            RoutingTable::new(),
            1,
        ))
    }

    #[test]
    fn test_unicast_to_known_next_hop_only() {
        let d = router().dispatch(&directed("R1D1", "R1D2", "R1D3"), &peers());
        assert_eq!(d.switch, Switch::Unicast);
        assert_eq!(d.deliveries.len(), 1);
        assert_eq!(d.deliveries[0].endpoint, Endpoint::new("mem", 5002));
        assert!(!d.deliveries[0].envelope.rebroadcast);
    }

    #[test]
    fn test_unicast_clears_marker() {
        let marked = directed("R2D1", "R1D2", "R1D2").marked();
        let d = router().dispatch(&marked, &peers());
        assert_eq!(d.switch, Switch::Unicast);
        assert!(!d.deliveries[0].envelope.rebroadcast);
    }

    #[test]
    fn test_broadcast_skips_sender_and_forwards_to_peers() {
        let d = router().dispatch(&discovery("R1D1"), &peers());
        assert_eq!(d.switch, Switch::Broadcast { local: 2, peers: 2 });

        let local: Vec<_> = d.deliveries.iter().filter(|x| !x.envelope.rebroadcast).collect();
        assert_eq!(local.len(), 2);
        assert!(local.iter().all(|x| x.endpoint.port != 5001));

        let forwarded: Vec<_> = d.deliveries.iter().filter(|x| x.envelope.rebroadcast).collect();
        let ports: Vec<u16> = forwarded.iter().map(|x| x.endpoint.port).collect();
        assert_eq!(ports, vec![6000, 7000]);
    }

    #[test]
    fn test_marked_broadcast_not_forwarded_again() {
        let d = router().dispatch(&discovery("R2D4").marked(), &peers());
        assert_eq!(d.switch, Switch::Broadcast { local: 3, peers: 0 });
        assert!(d.deliveries.iter().all(|x| !x.envelope.rebroadcast));
    }

    #[test]
    fn test_unknown_next_hop_falls_back_to_broadcast() {
        let d = router().dispatch(&directed("R1D1", "R9D9", "R9D9"), &peers());
        assert_eq!(d.switch, Switch::Broadcast { local: 2, peers: 2 });
    }

    #[test]
    fn test_register_device_last_write_wins() {
        let mut r = router();
        let old = r.register_device("R1D1", Endpoint::new("mem", 5999));
        assert_eq!(old, Some(Endpoint::new("mem", 5001)));
        assert_eq!(r.device_endpoint("R1D1"), Some(&Endpoint::new("mem", 5999)));
        assert_eq!(r.device_count(), 3);
    }

    #[tokio::test]
    async fn test_router_node_joins_and_leaves_registry() {
        let network = Arc::new(MemoryNetwork::new());
        let registry = Arc::new(MemoryRegistry::new());
        let cancel = CancellationToken::new();

        let node = RouterNode::new(router(), network.clone(), registry.clone());
        let task = tokio::spawn(node.run(cancel.clone()));

        for _ in 0..50 {
            if !registry.list().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(registry.list().unwrap().len(), 1);

        cancel.cancel();
        let r = task.await.unwrap().unwrap();
        assert_eq!(r.id(), "R1");
        assert!(registry.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_router_node_switches_over_network() {
        let network = Arc::new(MemoryNetwork::new());
        let registry = Arc::new(MemoryRegistry::new());
        let cancel = CancellationToken::new();

        let mut d2 = network.bind(&Endpoint::new("mem", 5002)).await.unwrap();
        let node = RouterNode::new(router(), network.clone(), registry.clone());
        let task = tokio::spawn(node.run(cancel.clone()));

        let ep = Endpoint::new("mem", 5000);
        let sent = directed("R1D1", "R1D2", "R1D3");
        let mut delivered = false;
        for _ in 0..50 {
            if network.send(&ep, &sent).await.is_ok() {
                delivered = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(delivered);
        assert_eq!(d2.accept().await.unwrap(), sent);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_router_node_keeps_switching_after_failures() {
        let network = Arc::new(MemoryNetwork::new());
        let registry = Arc::new(MemoryRegistry::new());
        let cancel = CancellationToken::new();

        // R1D3 at port 5003 is never bound, so every delivery to it fails.
        let mut d2 = network.bind(&Endpoint::new("mem", 5002)).await.unwrap();
        let node = RouterNode::new(router(), network.clone(), registry.clone());
        let task = tokio::spawn(node.run(cancel.clone()));

        let ep = Endpoint::new("mem", 5000);
        let broadcast = discovery("R1D1");
        let mut delivered = false;
        for _ in 0..50 {
            if network.send(&ep, &broadcast).await.is_ok() {
                delivered = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(delivered);
        network.send_raw(&ep, b"\x00\x00\x00\x03\x00{}").unwrap();
        let unicast = directed("R1D1", "R1D2", "R1D2");
        network.send(&ep, &unicast).await.unwrap();

        assert_eq!(d2.accept().await.unwrap(), broadcast);
        assert_eq!(d2.accept().await.unwrap(), unicast);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
