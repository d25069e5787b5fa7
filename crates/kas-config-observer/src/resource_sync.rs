//! Auxiliary resource mirroring
//!
//! Observers that reference a ConfigMap outside the workload namespace
//! request a mirror of it into that namespace. The decision to request a
//! mirror is content-based: a request is only issued when the target is
//! missing, the source was removed, or the contents differ.
//!
//! Requests go to a [`ResourceSyncer`]. [`ResourceSyncController`] is the
//! in-process implementation: it records rules idempotently and applies
//! them to the cluster on demand.

use crate::error::{ObserveError, Result};
use crate::lookup::StateLookup;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

/// Field manager used for server-side apply of mirrored ConfigMaps
pub const FIELD_MANAGER: &str = "kas-config-observer";

/// Namespaced resource location; an empty name means "no source"
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceLocation {
    pub namespace: String,
    pub name: String,
}

impl ResourceLocation {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The "delete the target" source
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("<none>")
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Receiver of mirror requests
///
/// Implementations must be idempotent: repeating a request for the same
/// (target, source) pair succeeds and has no further effect.
pub trait ResourceSyncer: Send + Sync {
    /// Mirror `source` into `target`; an empty source deletes the target
    fn sync_config_map(&self, target: ResourceLocation, source: ResourceLocation) -> Result<()>;
}

/// Result of a mirror decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Contents already match; nothing requested
    Unchanged,
    /// Copy from a named source requested
    Synced,
    /// Deletion of the target requested
    Removed,
}

/// Decide whether `target` must be re-synced from `source`
///
/// With a `key`, only that data key is compared; without one the whole
/// data maps are compared.
pub fn config_map_needs_sync(
    lookup: &dyn StateLookup,
    target: &ResourceLocation,
    source: &ResourceLocation,
    key: Option<&str>,
) -> Result<bool> {
    let Some(existing) = lookup.config_map(&target.namespace, &target.name)? else {
        debug!(target = %target, "Target configmap does not exist, sync needed");
        return Ok(true);
    };

    if source.is_empty() {
        debug!(target = %target, "Source removed, sync needed");
        return Ok(true);
    }

    let Some(source_cm) = lookup.config_map(&source.namespace, &source.name)? else {
        return Err(ObserveError::SourceNotFound {
            namespace: source.namespace.clone(),
            name: source.name.clone(),
        });
    };

    let empty = BTreeMap::new();
    let existing_data = existing.data.as_ref().unwrap_or(&empty);
    let source_data = source_cm.data.as_ref().unwrap_or(&empty);

    let Some(key) = key.filter(|k| !k.is_empty()) else {
        return Ok(existing_data != source_data);
    };

    match (existing_data.get(key), source_data.get(key)) {
        (Some(current), Some(desired)) => Ok(current != desired),
        (None, None) => Err(ObserveError::ComparisonKeyMissing {
            key: key.to_string(),
        }),
        // present on exactly one side
        _ => Ok(true),
    }
}

/// A mirror decision that has not been sent to a syncer yet
///
/// Observers plan every mirror first and only issue the plans once all
/// checks of the pass succeeded, so a failing pass leaves the syncer
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct MirrorPlan {
    target: ResourceLocation,
    request: Option<ResourceLocation>,
    outcome: MirrorOutcome,
}

impl MirrorPlan {
    pub fn target(&self) -> &ResourceLocation {
        &self.target
    }

    /// Outcome reported once the plan is issued
    pub fn outcome(&self) -> MirrorOutcome {
        self.outcome
    }

    /// Send the planned request, if any, to `syncer`
    pub fn issue(self, syncer: &dyn ResourceSyncer) -> Result<MirrorOutcome> {
        if let Some(source) = self.request {
            syncer.sync_config_map(self.target, source)?;
        }
        Ok(self.outcome)
    }
}

/// Plan a mirror of `source` into `target` when the contents differ
pub fn plan_config_map_sync(
    lookup: &dyn StateLookup,
    target: &ResourceLocation,
    source: &ResourceLocation,
    key: Option<&str>,
) -> Result<MirrorPlan> {
    if !config_map_needs_sync(lookup, target, source, key)? {
        return Ok(MirrorPlan {
            target: target.clone(),
            request: None,
            outcome: MirrorOutcome::Unchanged,
        });
    }

    let (request, outcome) = if source.is_empty() {
        (ResourceLocation::empty(), MirrorOutcome::Removed)
    } else {
        (source.clone(), MirrorOutcome::Synced)
    };
    Ok(MirrorPlan {
        target: target.clone(),
        request: Some(request),
        outcome,
    })
}

/// Plan deletion of a mirrored ConfigMap
///
/// The deletion is always requested since the syncer treats it
/// idempotently. The outcome is `Removed` only when the target currently
/// exists, so repeated passes against an already-clean namespace stay
/// quiet.
pub fn plan_config_map_removal(
    lookup: &dyn StateLookup,
    target: &ResourceLocation,
) -> Result<MirrorPlan> {
    let present = lookup.config_map(&target.namespace, &target.name)?.is_some();
    Ok(MirrorPlan {
        target: target.clone(),
        request: Some(ResourceLocation::empty()),
        outcome: if present {
            MirrorOutcome::Removed
        } else {
            MirrorOutcome::Unchanged
        },
    })
}

/// Request a mirror of `source` into `target` when the contents differ
///
/// Lookup failures and a missing named source are returned as errors and
/// no request is issued.
pub fn sync_config_map_if_needed(
    lookup: &dyn StateLookup,
    syncer: &dyn ResourceSyncer,
    target: &ResourceLocation,
    source: &ResourceLocation,
    key: Option<&str>,
) -> Result<MirrorOutcome> {
    plan_config_map_sync(lookup, target, source, key)?.issue(syncer)
}

/// Request deletion of a mirrored ConfigMap, see [`plan_config_map_removal`]
pub fn remove_config_map(
    lookup: &dyn StateLookup,
    syncer: &dyn ResourceSyncer,
    target: &ResourceLocation,
) -> Result<MirrorOutcome> {
    plan_config_map_removal(lookup, target)?.issue(syncer)
}

/// Idempotent registry of ConfigMap mirror rules
#[derive(Debug)]
pub struct ResourceSyncController {
    target_namespace: String,
    config_maps: DashMap<ResourceLocation, ResourceLocation>,
    generation: AtomicU64,
}

impl ResourceSyncController {
    /// Create a controller whose targets must live in `target_namespace`
    pub fn new(target_namespace: impl Into<String>) -> Self {
        Self {
            target_namespace: target_namespace.into(),
            config_maps: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Source currently registered for `target`
    pub fn rule_for(&self, target: &ResourceLocation) -> Option<ResourceLocation> {
        self.config_maps.get(target).map(|entry| entry.value().clone())
    }

    /// All registered rules, ordered by target
    pub fn rules(&self) -> Vec<(ResourceLocation, ResourceLocation)> {
        let mut rules: Vec<_> = self
            .config_maps
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rules.sort();
        rules
    }

    /// Number of rule changes so far; repeated identical requests do not count
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Copy or delete every registered target through the Kubernetes API
    ///
    /// Needs a reachable API server; the object sent for each copy is
    /// built by [`mirrored_config_map`].
    #[instrument(skip(self, client))]
    pub async fn apply_config_map_rules(&self, client: &Client) -> Result<()> {
        for (target, source) in self.rules() {
            let targets: Api<ConfigMap> = Api::namespaced(client.clone(), &target.namespace);

            if source.is_empty() {
                delete_config_map(&targets, &target).await?;
                continue;
            }

            let sources: Api<ConfigMap> = Api::namespaced(client.clone(), &source.namespace);
            match sources.get_opt(&source.name).await? {
                Some(source_cm) => {
                    let mirrored = mirrored_config_map(&target, source_cm);
                    debug!(target = %target, source = %source, "Applying mirrored ConfigMap");
                    let patch_params = PatchParams::apply(FIELD_MANAGER).force();
                    targets
                        .patch(&target.name, &patch_params, &Patch::Apply(&mirrored))
                        .await?;
                }
                None => {
                    warn!(target = %target, source = %source, "Mirror source missing, deleting target");
                    delete_config_map(&targets, &target).await?;
                }
            }
        }
        Ok(())
    }
}

/// The object applied to `target` when mirroring `source`
///
/// Only the payload is copied. Labels, annotations and owner references of
/// the source stay behind.
pub fn mirrored_config_map(target: &ResourceLocation, source: ConfigMap) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            ..Default::default()
        },
        data: source.data,
        binary_data: source.binary_data,
        immutable: None,
    }
}

async fn delete_config_map(api: &Api<ConfigMap>, target: &ResourceLocation) -> Result<()> {
    match api.delete(&target.name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(target = %target, "Deleted mirrored ConfigMap");
            Ok(())
        }
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl ResourceSyncer for ResourceSyncController {
    fn sync_config_map(&self, target: ResourceLocation, source: ResourceLocation) -> Result<()> {
        if target.namespace != self.target_namespace {
            return Err(ObserveError::Sync(format!(
                "target {} is outside namespace {}",
                target, self.target_namespace
            )));
        }
        if target.is_empty() {
            return Err(ObserveError::Sync("target name is empty".to_string()));
        }

        let previous = self.config_maps.insert(target.clone(), source.clone());
        if previous.as_ref() == Some(&source) {
            debug!(target = %target, source = %source, "Mirror rule unchanged");
            return Ok(());
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(target = %target, source = %source, "Mirror rule registered");
        Ok(())
    }
}
