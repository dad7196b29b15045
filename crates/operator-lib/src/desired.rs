//! Desired workload specs and the umbrella owner object
//!
//! The reconcilers only read from a [`DesiredSpecProvider`]. The
//! [`DesiredSpecCache`] is the in-process implementation, written to by the
//! manifest loader and the owner refresher and nobody else.

use crate::models::ManagedResourceRef;
use crate::table::ManagedResourceTable;
use anyhow::{Context, Result};
use dashmap::DashMap;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Read-only view of desired specs and the owner object
pub trait DesiredSpecProvider: Send + Sync {
    /// Snapshot of the desired body for a managed resource, if rendered yet
    fn desired_spec(&self, name: &str) -> Option<DynamicObject>;

    /// Snapshot of the object recreated resources are owned by, if known
    fn owner(&self) -> Option<DynamicObject>;
}

/// Shared cache of desired specs keyed by managed resource name
#[derive(Default)]
pub struct DesiredSpecCache {
    specs: DashMap<String, DynamicObject>,
    owner: RwLock<Option<DynamicObject>>,
}

impl DesiredSpecCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_spec(&self, name: impl Into<String>, spec: DynamicObject) {
        self.specs.insert(name.into(), spec);
    }

    pub fn remove_spec(&self, name: &str) -> Option<DynamicObject> {
        self.specs.remove(name).map(|(_, v)| v)
    }

    pub fn set_owner(&self, owner: Option<DynamicObject>) {
        let mut slot = self.owner.write().unwrap_or_else(|e| e.into_inner());
        *slot = owner;
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl DesiredSpecProvider for DesiredSpecCache {
    fn desired_spec(&self, name: &str) -> Option<DynamicObject> {
        self.specs.get(name).map(|r| r.value().clone())
    }

    fn owner(&self) -> Option<DynamicObject> {
        self.owner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Loads desired specs from a directory of YAML manifests
pub struct ManifestLoader {
    table: Arc<ManagedResourceTable>,
}

impl ManifestLoader {
    pub fn new(table: Arc<ManagedResourceTable>) -> Self {
        Self { table }
    }

    /// Parse every `.yaml`/`.yml` file in `dir` and store the documents that
    /// match a managed resource by name, namespace and kind.
    ///
    /// Returns the number of specs stored. Specs no longer present on disk are
    /// dropped from the cache.
    pub async fn load_dir(&self, dir: &Path, cache: &DesiredSpecCache) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read manifest directory {}", dir.display()))?;

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read manifest {}", path.display()))?;
            for obj in parse_manifests(&content)
                .with_context(|| format!("Failed to parse manifest {}", path.display()))?
            {
                if let Some(reference) = self.match_managed(&obj) {
                    debug!(resource = %reference, path = %path.display(), "Loaded desired spec");
                    found.push((reference.name.clone(), obj));
                }
            }
        }

        let stored = found.len();
        let names: Vec<String> = found.iter().map(|(n, _)| n.clone()).collect();
        for (name, obj) in found {
            cache.set_spec(name, obj);
        }
        for entry in self.table.entries() {
            let name = &entry.reference.name;
            if !names.contains(name) && cache.remove_spec(name).is_some() {
                info!(resource = %entry.reference, "Desired spec removed from manifests");
            }
        }

        Ok(stored)
    }

    fn match_managed(&self, obj: &DynamicObject) -> Option<&ManagedResourceRef> {
        let name = obj.metadata.name.as_deref()?;
        let entry = match self.table.by_name(name) {
            Some(entry) => entry,
            None => {
                debug!(name = %name, "Skipping manifest for unmanaged resource");
                return None;
            }
        };
        let reference = &entry.reference;
        let kind = obj.types.as_ref().map(|t| t.kind.as_str());
        if kind != Some(reference.kind.as_str()) {
            warn!(resource = %reference, kind = ?kind, "Skipping manifest with unexpected kind");
            return None;
        }
        if obj.metadata.namespace.as_deref() != Some(reference.namespace.as_str()) {
            warn!(
                resource = %reference,
                namespace = ?obj.metadata.namespace,
                "Skipping manifest with unexpected namespace"
            );
            return None;
        }
        Some(reference)
    }
}

/// Split a multi-document YAML string into dynamic objects
pub fn parse_manifests(content: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    Ok(objects)
}

/// Identity of the owner object in the cluster
#[derive(Debug, Clone)]
pub struct OwnerObjectRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
}

impl Default for OwnerObjectRef {
    fn default() -> Self {
        Self {
            group: "config.openshift.io".to_string(),
            version: "v1".to_string(),
            kind: "Network".to_string(),
            name: "cluster".to_string(),
        }
    }
}

/// Periodically fetches the owner object and reloads manifests into the cache
pub struct ConfigRefresher {
    client: Client,
    owner: OwnerObjectRef,
    loader: ManifestLoader,
    manifests_dir: Option<std::path::PathBuf>,
    cache: Arc<DesiredSpecCache>,
    period: Duration,
}

impl ConfigRefresher {
    pub fn new(
        client: Client,
        owner: OwnerObjectRef,
        loader: ManifestLoader,
        manifests_dir: Option<std::path::PathBuf>,
        cache: Arc<DesiredSpecCache>,
        period: Duration,
    ) -> Self {
        Self {
            client,
            owner,
            loader,
            manifests_dir,
            cache,
            period,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(period_secs = self.period.as_secs(), "Starting configuration refresher");
        let mut ticker = interval(self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down configuration refresher");
                    break;
                }
            }
        }
    }

    /// One refresh pass; failures keep the previous cache content
    pub async fn refresh(&self) {
        if let Some(dir) = &self.manifests_dir {
            match self.loader.load_dir(dir, &self.cache).await {
                Ok(count) => debug!(specs = count, "Reloaded desired specs"),
                Err(e) => warn!(error = %e, "Failed to reload desired specs"),
            }
        }

        match self.fetch_owner().await {
            Ok(owner) => {
                if owner.is_none() {
                    debug!(name = %self.owner.name, kind = %self.owner.kind, "Owner object not found yet");
                }
                self.cache.set_owner(owner);
            }
            Err(e) => warn!(error = %e, "Failed to fetch owner object"),
        }
    }

    async fn fetch_owner(&self) -> Result<Option<DynamicObject>, kube::Error> {
        let gvk = GroupVersionKind::gvk(&self.owner.group, &self.owner.version, &self.owner.kind);
        let ar = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let mut owner = api.get_opt(&self.owner.name).await?;
        if let Some(obj) = owner.as_mut() {
            if obj.types.is_none() {
                obj.types = Some(kube::api::TypeMeta {
                    api_version: ar.api_version.clone(),
                    kind: ar.kind.clone(),
                });
            }
        }
        Ok(owner)
    }
}
