//! The storage driver collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Abstraction over the volume driver for testability.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Provisioner name written into storage classes.
    fn provisioner(&self) -> &str;

    /// Confirm `volume` was restored from `snapshot` at or after `since`.
    async fn validate_volume_snapshot_restore(
        &self,
        volume: &str,
        snapshot: &str,
        since: DateTime<Utc>,
    ) -> Result<(), String>;
}

/// A storage driver with a fixed provisioner. Restores validate unless the
/// volume was marked bad.
#[derive(Debug)]
pub struct FixedStorageDriver {
    name: String,
    provisioner: String,
    bad_restores: Mutex<BTreeSet<String>>,
}

impl FixedStorageDriver {
    pub fn new(name: impl Into<String>, provisioner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provisioner: provisioner.into(),
            bad_restores: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make restore validation of `volume` fail.
    pub fn reject_restore_of(&self, volume: &str) {
        let mut bad = self.bad_restores.lock().unwrap_or_else(|e| e.into_inner());
        bad.insert(volume.to_string());
    }
}

#[async_trait]
impl StorageDriver for FixedStorageDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn provisioner(&self) -> &str {
        &self.provisioner
    }

    async fn validate_volume_snapshot_restore(
        &self,
        volume: &str,
        snapshot: &str,
        since: DateTime<Utc>,
    ) -> Result<(), String> {
        let bad = self.bad_restores.lock().unwrap_or_else(|e| e.into_inner());
        if bad.contains(volume) {
            return Err(format!(
                "volume {} was not restored from {} since {}",
                volume,
                snapshot,
                since.to_rfc3339()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejected_restore_fails_validation() {
        let driver = FixedStorageDriver::new("pxd", "kubernetes.io/portworx-volume");
        assert_eq!(driver.provisioner(), "kubernetes.io/portworx-volume");

        let since = Utc::now();
        assert!(driver.validate_volume_snapshot_restore("vol-1", "snap-1", since).await.is_ok());
        driver.reject_restore_of("vol-1");
        let err = driver
            .validate_volume_snapshot_restore("vol-1", "snap-1", since)
            .await
            .unwrap_err();
        assert!(err.contains("vol-1"));
    }
}
