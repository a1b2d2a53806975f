use manet_config::ManetConfig;
use manet_core::Result;
use manet_mesh::Simulation;

pub(super) fn cmd_simulate(config: ManetConfig, routers: usize, max_deliveries: usize) -> Result<()> {
    let mut sim = Simulation::seeded(&config, routers.max(1))?;
    sim.start();
    let stats = sim.run_until_quiet(max_deliveries)?;

    for router in sim.routers() {
        println!(
            "Router {} ({}), {} device(s)",
            router.id(),
            router.endpoint(),
            router.device_count()
        );
    }
    println!();

    for device in sim.devices() {
        println!(
            "{} at {}, radius {}, {} route(s):",
            device.id(),
            device.coord(),
            device.radius(),
            device.table().len()
        );
        println!("{}\n", device.table());
    }

    println!("Deliveries:        {}", stats.deliveries);
    println!("  unicast:         {}", stats.unicasts);
    println!("  broadcast:       {}", stats.broadcasts);
    println!("  router forwards: {}", stats.router_forwards);
    println!("Merged:            {} ({} changed a table)", stats.merged, stats.table_changes);
    println!("Relayed:           {}", stats.relayed);
    println!("Out of range:      {}", stats.discarded_by_range);
    println!("Not addressed:     {}", stats.discarded_by_relevance);
    println!("Unroutable:        {}", stats.unroutable);
    if stats.dropped + stats.undeliverable > 0 {
        println!("Lost:              {} dropped, {} undeliverable", stats.dropped, stats.undeliverable);
    }
    Ok(())
}
