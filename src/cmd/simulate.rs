//! Full lifecycle run against the in-memory cluster: `convoy simulate`.

use anyhow::{Context, Result};
use convoy::cluster::InMemoryCluster;
use convoy::config::ConvoyConfig;
use convoy::node::InMemoryNodeDriver;
use convoy::orchestrator::{DestroyOptions, Orchestrator, ScheduleOptions};
use convoy::storage::FixedStorageDriver;
use convoy::template::TemplateRegistry;
use std::path::Path;
use std::sync::Arc;

const SIMULATED_DRIVER: &str = "simulated";
const SIMULATED_PROVISIONER: &str = "convoy.io/simulated";

pub async fn cmd_simulate(
    config: ConvoyConfig,
    spec_dir: &Path,
    instance_id: &str,
    app: Option<&str>,
    workers: usize,
) -> Result<()> {
    let templates = TemplateRegistry::load_dir(spec_dir)?;
    let node_driver = InMemoryNodeDriver::new();
    let cluster = InMemoryCluster::with_workers(workers).with_node_driver(node_driver.clone(), &config.cluster.pods_root);
    let storage = FixedStorageDriver::new(SIMULATED_DRIVER, SIMULATED_PROVISIONER);
    let policy = config.timeouts.default_policy();

    let mut orchestrator = Orchestrator::new(Arc::new(cluster), Arc::new(storage), Arc::new(node_driver), config)
        .with_templates(templates);
    orchestrator
        .refresh_nodes()
        .await
        .context("Failed to discover simulated nodes")?;

    let options = match app {
        Some(key) => ScheduleOptions::for_apps([key]),
        None => ScheduleOptions::default(),
    };
    let mut contexts = orchestrator.schedule(instance_id, &options).await?;
    if contexts.is_empty() {
        println!("No enabled applications in {}", spec_dir.display());
        return Ok(());
    }

    for ctx in &mut contexts {
        orchestrator.wait_for_running(ctx, policy.timeout, policy.interval).await?;
        println!("{}", orchestrator.describe(ctx).await);
        println!();
    }

    let destroy = DestroyOptions {
        wait_for_destroy: true,
        wait_for_resource_leak_cleanup: true,
    };
    for ctx in &mut contexts {
        orchestrator.destroy(ctx, &destroy).await?;
        println!(
            "{} {} ({})",
            console::style("Destroyed").green(),
            ctx.app_key,
            ctx.namespace
        );
    }
    Ok(())
}
