//! Human-readable dump of an application's live state.

use super::Orchestrator;
use super::context::AppContext;
use convoy_common::Resource;
use convoy_common::resources::TransferStatus;

fn transfer(status: &Option<TransferStatus>) -> String {
    match status {
        Some(s) => match &s.reason {
            Some(reason) => format!("{:?}/{:?} ({})", s.stage, s.status, reason),
            None => format!("{:?}/{:?}", s.stage, s.status),
        },
        None => "no status yet".to_string(),
    }
}

/// One-line status of a live object.
fn summary(live: &Resource) -> String {
    match live {
        Resource::Deployment(d) => format!("{}/{} replicas ready", d.ready_replicas(), d.desired_replicas()),
        Resource::StatefulSet(s) => format!("{}/{} replicas ready", s.ready_replicas(), s.desired_replicas()),
        Resource::Pod(p) => match p.node_name() {
            Some(node) => format!("{:?} on {}", p.phase(), node),
            None => format!("{:?}, unscheduled", p.phase()),
        },
        Resource::PersistentVolumeClaim(c) => {
            let phase = c.status.as_ref().map(|s| s.phase).unwrap_or_default();
            match (c.capacity(), &c.spec.volume_name) {
                (Some(size), Some(volume)) => format!("{:?}, {} ({})", phase, size, volume),
                _ => format!("{:?}", phase),
            }
        }
        Resource::StorageClass(sc) => format!("provisioner {}", sc.provisioner),
        Resource::VolumeSnapshot(s) => match (&s.status, s.is_ready()) {
            (_, true) => "ready".to_string(),
            (Some(status), false) if status.error.is_some() => {
                format!("failed: {}", status.error.as_deref().unwrap_or_default())
            }
            _ => "not ready".to_string(),
        },
        Resource::GroupVolumeSnapshot(g) => match &g.status {
            Some(s) => format!("{:?}, {} snapshots", s.status, s.volume_snapshots.len()),
            None => "no status yet".to_string(),
        },
        Resource::VolumeSnapshotRestore(r) => match &r.status {
            Some(s) => format!("{:?}, {} volumes", s.status, s.volumes.len()),
            None => "no status yet".to_string(),
        },
        Resource::Service(s) => match &s.spec.cluster_ip {
            Some(ip) => format!("{} ports, cluster ip {}", s.spec.ports.len(), ip),
            None => format!("{} ports", s.spec.ports.len()),
        },
        Resource::Secret(s) => format!("{} keys", s.data.len()),
        Resource::ConfigMap(c) => format!("{} keys", c.data.len()),
        Resource::Rule(r) => format!("{} rules", r.rules.len()),
        Resource::ScalingRule(r) => format!(
            "{} conditions, {} actions",
            r.spec.conditions.len(),
            r.spec.actions.len()
        ),
        Resource::ClusterPair(p) => match &p.status {
            Some(s) => format!("scheduler {:?}, storage {:?}", s.scheduler_status, s.storage_status),
            None => "no status yet".to_string(),
        },
        Resource::Migration(m) => transfer(&m.status),
        Resource::MigrationSchedule(s) => match s.latest_transfer() {
            Some(latest) => format!("latest {} {:?}", latest.name, latest.status),
            None => "no transfers yet".to_string(),
        },
        Resource::SchedulePolicy(_) | Resource::BackupLocation(_) => "present".to_string(),
        Resource::ApplicationBackup(b) => transfer(&b.status),
        Resource::ApplicationRestore(r) => transfer(&r.status),
        Resource::ApplicationClone(c) => transfer(&c.status),
    }
}

impl Orchestrator {
    /// Describe every descriptor of the app as the store currently sees it.
    /// A failed lookup is reported in place of that object's status.
    pub async fn describe(&self, ctx: &AppContext) -> String {
        let mut lines = vec![
            format!("App {} (instance {}) in namespace {}", ctx.app_key, ctx.id, ctx.namespace),
            format!("Stage: {}", ctx.stage()),
        ];
        if let Some(err) = ctx.last_error() {
            lines.push(format!("Last error: {}", err));
        }

        for resource in &ctx.resources {
            let key = resource.key();
            let status = match self.store().get(&key).await {
                Ok(live) => summary(&live),
                Err(e) => format!("lookup failed: {}", e),
            };
            lines.push(format!("  {}: {}", key, status));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterStore;
    use crate::orchestrator::ScheduleOptions;
    use crate::orchestrator::testing::{MYSQL, harness};
    use convoy_common::{ResourceKey, ResourceKind};

    #[tokio::test(start_paused = true)]
    async fn test_describe_lists_live_status() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let ctx = h
            .orchestrator
            .schedule("7", &ScheduleOptions::for_apps(["mysql"]))
            .await
            .unwrap()
            .remove(0);

        let out = h.orchestrator.describe(&ctx).await;
        assert!(out.starts_with("App mysql (instance 7) in namespace mysql-7"));
        assert!(out.contains("Deployment mysql-7/mysql: 1/1 replicas ready"));
        assert!(out.contains("PersistentVolumeClaim mysql-7/mysql-data: Bound, 2Gi"));
        assert!(!out.contains("Last error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_embeds_lookup_failures() {
        let h = harness(&[("mysql", MYSQL)]).await;
        let ctx = h
            .orchestrator
            .schedule("7", &ScheduleOptions::for_apps(["mysql"]))
            .await
            .unwrap()
            .remove(0);
        h.cluster
            .delete(&ResourceKey::new(ResourceKind::Deployment, Some("mysql-7"), "mysql"))
            .await
            .unwrap();

        let out = h.orchestrator.describe(&ctx).await;
        assert!(out.contains("Deployment mysql-7/mysql: lookup failed"));
        assert!(out.contains("StorageClass mysql-sc: provisioner"));
    }
}
