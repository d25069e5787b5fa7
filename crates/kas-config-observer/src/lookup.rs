//! Read-only cluster state lookup
//!
//! Observers read cluster state through [`StateLookup`]. Production drivers
//! back it with informer caches; [`ClusterSnapshot`] is an in-memory
//! point-in-time view used by the CLI and the tests.

use crate::crd::Authentication;
use crate::error::{ObserveError, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Point-in-time read access to cluster resources
///
/// Implementations return `Ok(None)` for resources that do not exist and
/// reserve `Err` for lookup failures.
pub trait StateLookup: Send + Sync {
    /// Get a cluster-scoped Authentication resource
    fn authentication(&self, name: &str) -> Result<Option<Arc<Authentication>>>;

    /// Get a ConfigMap
    fn config_map(&self, namespace: &str, name: &str) -> Result<Option<Arc<ConfigMap>>>;
}

/// Build a ConfigMap holding `data`
pub fn config_map_with_data<I, K, V>(namespace: &str, name: &str, data: I) -> ConfigMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Immutable in-memory view of cluster state
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    authentications: BTreeMap<String, Arc<Authentication>>,
    config_maps: BTreeMap<(String, String), Arc<ConfigMap>>,
}

/// Kind discriminator used when loading snapshot documents
#[derive(Deserialize)]
struct TypeMeta {
    kind: String,
}

impl ClusterSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an Authentication resource
    pub fn with_authentication(mut self, auth: Authentication) -> Self {
        self.authentications
            .insert(auth.name_any(), Arc::new(auth));
        self
    }

    /// Add a ConfigMap
    pub fn with_config_map(mut self, cm: ConfigMap) -> Self {
        let key = (
            cm.namespace().unwrap_or_else(|| "default".to_string()),
            cm.name_any(),
        );
        self.config_maps.insert(key, Arc::new(cm));
        self
    }

    /// Number of resources held
    pub fn len(&self) -> usize {
        self.authentications.len() + self.config_maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse a multi-document YAML stream of Authentication and ConfigMap objects
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut snapshot = Self::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let meta: TypeMeta = serde_yaml::from_value(value.clone())?;
            match meta.kind.as_str() {
                "Authentication" => {
                    snapshot = snapshot.with_authentication(serde_yaml::from_value(value)?);
                }
                "ConfigMap" => {
                    snapshot = snapshot.with_config_map(serde_yaml::from_value(value)?);
                }
                other => {
                    return Err(ObserveError::InvalidConfig(format!(
                        "unsupported kind in snapshot: {}",
                        other
                    )));
                }
            }
        }
        debug!(resources = snapshot.len(), "Loaded cluster snapshot");
        Ok(snapshot)
    }

    /// Load a snapshot from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
}

impl StateLookup for ClusterSnapshot {
    fn authentication(&self, name: &str) -> Result<Option<Arc<Authentication>>> {
        Ok(self.authentications.get(name).cloned())
    }

    fn config_map(&self, namespace: &str, name: &str) -> Result<Option<Arc<ConfigMap>>> {
        Ok(self
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
