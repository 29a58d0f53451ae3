//! Application templates and the registry that loads them from disk.
//!
//! A spec directory holds one sub-directory per application; the directory
//! name is the application key. Every YAML document in the files below it is
//! one resource descriptor, selected by its `kind` field. A `.disabled` marker
//! file in an application directory loads it with `enabled = false`.
//!
//! ```text
//! specs/
//!   mysql/
//!     claim.yaml
//!     deployment.yaml
//!   legacy/
//!     .disabled
//!     pod.yaml
//! ```

use crate::errors::SchedulerError;
use anyhow::{Context, Result};
use convoy_common::{Phase, Resource, ResourceKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

pub const DISABLED_MARKER: &str = ".disabled";

/// An ordered list of descriptors under one key. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AppTemplate {
    pub key: String,
    pub enabled: bool,
    pub resources: Vec<Resource>,
}

impl AppTemplate {
    pub fn new(key: impl Into<String>, resources: Vec<Resource>) -> Self {
        Self {
            key: key.into(),
            enabled: true,
            resources,
        }
    }

    /// Namespace an instance of this app runs in: `<key>-<instance id>`.
    pub fn namespace_for(&self, instance_id: &str) -> String {
        format!("{}-{}", self.key, instance_id)
    }

    /// Descriptors grouped by phase, in phase order. Declaration order is
    /// kept within each phase.
    pub fn by_phase(&self) -> BTreeMap<Phase, Vec<&Resource>> {
        let mut grouped: BTreeMap<Phase, Vec<&Resource>> = BTreeMap::new();
        for resource in &self.resources {
            grouped.entry(resource.phase()).or_default().push(resource);
        }
        grouped
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    apps: BTreeMap<String, AppTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(templates: impl IntoIterator<Item = AppTemplate>) -> Self {
        Self {
            apps: templates.into_iter().map(|t| (t.key.clone(), t)).collect(),
        }
    }

    /// Load every application under `dir`. Fails on the first unreadable
    /// file, malformed document or unsupported kind.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        registry.rescan(dir)?;
        Ok(registry)
    }

    /// Replace the registry contents with what is currently under `dir`.
    pub fn rescan(&mut self, dir: &Path) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read spec directory: {}", dir.display()))?;

        let mut app_dirs = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
            if entry.path().is_dir() {
                app_dirs.push(entry.path());
            }
        }
        app_dirs.sort();

        let mut apps = BTreeMap::new();
        for app_dir in app_dirs {
            let Some(key) = app_dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let template = load_app(&key, &app_dir)?;
            apps.insert(key, template);
        }

        self.apps = apps;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&AppTemplate> {
        self.apps.get(key)
    }

    pub fn all(&self) -> impl Iterator<Item = &AppTemplate> {
        self.apps.values()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &AppTemplate> {
        self.apps.values().filter(|t| t.enabled)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

fn load_app(key: &str, app_dir: &Path) -> Result<AppTemplate> {
    let mut files: Vec<_> = WalkDir::new(app_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
        .collect();
    files.sort();

    let mut resources = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read spec file: {}", file.display()))?;
        resources.extend(decode_documents(key, &content, Some(&file.display().to_string()))?);
    }

    Ok(AppTemplate {
        key: key.to_string(),
        enabled: !app_dir.join(DISABLED_MARKER).exists(),
        resources,
    })
}

/// Decode a multi-document YAML string into descriptors for app `key`.
pub fn decode_documents(key: &str, content: &str, source_file: Option<&str>) -> Result<Vec<Resource>> {
    let location = source_file.unwrap_or("<inline>");
    let mut resources = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("Malformed YAML document {} in {}", index + 1, location))?;
        if value.is_null() {
            continue;
        }

        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .with_context(|| format!("Document {} in {} has no kind", index + 1, location))?
            .to_string();
        if kind.parse::<ResourceKind>().is_err() {
            return Err(SchedulerError::UnsupportedResourceKind {
                app: key.to_string(),
                kind: kind.to_string(),
                source_file: source_file.map(str::to_string),
            }
            .into());
        }

        let resource: Resource = serde_yaml::from_value(value)
            .with_context(|| format!("Invalid {} in document {} of {}", kind, index + 1, location))?;
        resources.push(resource);
    }

    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MYSQL: &str = r#"
kind: PersistentVolumeClaim
metadata:
  name: mysql-data
spec:
  resources:
    requests:
      storage: 2Gi
---
kind: Deployment
metadata:
  name: mysql
spec:
  replicas: 1
"#;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_dir_keys_by_directory() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "mysql/app.yaml", MYSQL);
        write(tmp.path(), "nginx/svc.yml", "kind: Service\nmetadata:\n  name: web\n");
        write(tmp.path(), "nginx/README.md", "not a spec");

        let registry = TemplateRegistry::load_dir(tmp.path()).unwrap();
        assert_eq!(registry.len(), 2);

        let mysql = registry.get("mysql").unwrap();
        assert!(mysql.enabled);
        assert_eq!(mysql.resources.len(), 2);
        assert_eq!(mysql.resources[0].kind(), ResourceKind::PersistentVolumeClaim);
        assert_eq!(mysql.namespace_for("42"), "mysql-42");
    }

    #[test]
    fn test_unsupported_kind_is_typed_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "cron/job.yaml", "kind: CronJob\nmetadata:\n  name: nightly\n");

        let err = TemplateRegistry::load_dir(tmp.path()).unwrap_err();
        let typed = err.downcast_ref::<SchedulerError>().unwrap();
        assert!(matches!(
            typed,
            SchedulerError::UnsupportedResourceKind { app, kind, .. } if app == "cron" && kind == "CronJob"
        ));
    }

    #[test]
    fn test_disabled_marker() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "legacy/pod.yaml", "kind: Pod\nmetadata:\n  name: p\n");
        write(tmp.path(), "legacy/.disabled", "");

        let registry = TemplateRegistry::load_dir(tmp.path()).unwrap();
        assert!(!registry.get("legacy").unwrap().enabled);
        assert_eq!(registry.enabled().count(), 0);
    }

    #[test]
    fn test_rescan_picks_up_new_apps() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "mysql/app.yaml", MYSQL);
        let mut registry = TemplateRegistry::load_dir(tmp.path()).unwrap();
        assert_eq!(registry.len(), 1);

        write(tmp.path(), "redis/svc.yaml", "kind: Service\nmetadata:\n  name: redis\n");
        registry.rescan(tmp.path()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_by_phase_orders_storage_before_core() {
        let resources = decode_documents("mysql", MYSQL, None).unwrap();
        let template = AppTemplate::new("mysql", resources);
        let phases: Vec<Phase> = template.by_phase().keys().copied().collect();
        assert_eq!(phases, vec![Phase::Storage, Phase::Core]);
    }

    #[test]
    fn test_missing_kind_is_an_error() {
        let err = decode_documents("x", "metadata:\n  name: a\n", None).unwrap_err();
        assert!(err.to_string().contains("has no kind"));
    }
}
