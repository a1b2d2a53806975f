//! Seeding a router and its devices, and running them as tokio tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use manet_config::{GridBounds, ManetConfig};
use manet_core::{
    Coordinate, DeviceRecord, Endpoint, ManetError, Result, RouterId, RouterRecord,
};

use crate::device::{Device, DeviceNode};
use crate::registry::{Registry, next_router_id, next_router_port};
use crate::router::{Router, RouterNode};
use crate::transport::Network;

/// One device to be started: identity, port, and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlan {
    pub record: DeviceRecord,
    pub coord: Coordinate,
}

/// A router and the devices it will own.
#[derive(Debug, Clone)]
pub struct RouterPlan {
    pub record: RouterRecord,
    pub devices: Vec<DevicePlan>,
    pub radius: u32,
}

impl RouterPlan {
    /// The router with every planned device registered.
    pub fn router(&self) -> Router {
        let mut router = Router::new(self.record.id.clone(), self.record.endpoint.clone());
        for plan in &self.devices {
            router.register(plan.record.clone());
        }
        router
    }

    pub fn device(&self, plan: &DevicePlan) -> Device {
        Device::new(plan.record.id.clone(), plan.coord, self.radius)
    }
}

/// Allocate an id and port block next to the `existing` routers and place
/// `devices.count` devices at random grid positions.
pub fn plan_router(
    existing: &[RouterRecord],
    address: &str,
    config: &ManetConfig,
) -> Result<RouterPlan> {
    let id = next_router_id(existing);
    let port = next_router_port(
        existing,
        config.network.base_port,
        config.network.port_stride,
    )?;

    let devices = (1..=config.devices.count)
        .map(|n| -> Result<DevicePlan> {
            let device_port = u16::try_from(n)
                .ok()
                .and_then(|n| port.checked_add(n))
                .ok_or_else(|| {
                    ManetError::Config(format!("device port for {id}D{n} exceeds 65535"))
                })?;
            Ok(DevicePlan {
                record: DeviceRecord::new(
                    device_id(&id, n),
                    Endpoint::new(address, device_port),
                ),
                coord: random_coordinate(&config.devices.grid),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RouterPlan {
        record: RouterRecord::new(id, Endpoint::new(address, port)),
        devices,
        radius: config.devices.radius,
    })
}

/// `R1` + 7 -> `R1D7`.
pub fn device_id(router: &str, n: u32) -> String {
    format!("{router}D{n}")
}

/// Uniform position inside the grid, bounds inclusive.
pub fn random_coordinate(grid: &GridBounds) -> Coordinate {
    Coordinate::new(
        random_between(grid.min_x, grid.max_x),
        random_between(grid.min_y, grid.max_y),
    )
}

fn random_between(min: i64, max: i64) -> i64 {
    if max <= min {
        return min;
    }
    let span = max.abs_diff(min).saturating_add(1);
    min.saturating_add((rand::random::<u64>() % span) as i64)
}

/// A running router and its device tasks.
pub struct RouterHandle {
    pub id: RouterId,
    pub endpoint: Endpoint,
    router: JoinHandle<Result<Router>>,
    devices: Vec<JoinHandle<Result<Device>>>,
}

impl RouterHandle {
    /// Wait for every task to stop (cancel the token first) and collect the
    /// final router and device states.
    pub async fn join(self) -> Result<(Router, Vec<Device>)> {
        let router = self
            .router
            .await
            .map_err(|e| ManetError::Task(e.to_string()))??;
        let mut devices = Vec::with_capacity(self.devices.len());
        for handle in self.devices {
            devices.push(handle.await.map_err(|e| ManetError::Task(e.to_string()))??);
        }
        Ok((router, devices))
    }
}

/// Plan a router from the registry, then spawn it and all its devices.
pub async fn spawn_router(
    config: &ManetConfig,
    network: Arc<dyn Network>,
    registry: Arc<dyn Registry>,
    cancel: CancellationToken,
) -> Result<RouterHandle> {
    let address = config.network.resolved_address()?;
    let plan = plan_router(&registry.list()?, &address, config)?;
    spawn_plan(&plan, config, network, registry, cancel).await
}

/// Spawn an already planned router and its devices.
pub async fn spawn_plan(
    plan: &RouterPlan,
    config: &ManetConfig,
    network: Arc<dyn Network>,
    registry: Arc<dyn Registry>,
    cancel: CancellationToken,
) -> Result<RouterHandle> {
    let node = RouterNode::new(plan.router(), network.clone(), registry);
    let router = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            // A router that cannot start takes its devices down with it.
            let result = node.run(cancel.clone()).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });

    let delay = Duration::from_millis(config.devices.startup_delay_ms);
    let devices = plan
        .devices
        .iter()
        .map(|p| {
            let node = DeviceNode::new(
                plan.device(p),
                p.record.endpoint.clone(),
                plan.record.endpoint.clone(),
                network.clone(),
                delay,
            );
            tokio::spawn(node.run(cancel.clone()))
        })
        .collect();

    info!(
        router = %plan.record.id,
        endpoint = %plan.record.endpoint,
        devices = plan.devices.len(),
        radius = plan.radius,
        "router and devices spawned"
    );

    Ok(RouterHandle {
        id: plan.record.id.clone(),
        endpoint: plan.record.endpoint.clone(),
        router,
        devices,
    })
}
