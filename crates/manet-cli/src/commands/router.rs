use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use manet_config::ManetConfig;
use manet_core::Result;
use manet_mesh::{FileRegistry, Network, Registry, TcpNetwork, spawn_router};

pub(super) async fn cmd_router(config: ManetConfig) -> Result<()> {
    let registry: Arc<dyn Registry> = Arc::new(FileRegistry::new(&config.registry.path));
    let network: Arc<dyn Network> = Arc::new(TcpNetwork::new(config.network.max_frame_bytes));
    let cancel = CancellationToken::new();

    let handle = spawn_router(&config, network, registry, cancel.clone()).await?;
    println!(
        "📡 Router {} listening on {} with {} device(s), radius {}",
        handle.id, handle.endpoint, config.devices.count, config.devices.radius
    );
    println!("   Registry: {}", config.registry.path.display());
    println!("   Press Ctrl-C to stop.\n");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(router = %handle.id, "interrupt received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    let id = handle.id.clone();
    let (_router, devices) = handle.join().await?;
    println!("\nFinal routing tables for {id}:\n");
    for device in &devices {
        println!("{} at {}:", device.id(), device.coord());
        println!("{}\n", device.table());
    }
    Ok(())
}
