//! Observer contract and registry
//!
//! A [`ConfigObserver`] translates one slice of cluster state into a
//! fragment of the next configuration. Each observer declares the paths it
//! owns; the [`ObserverRegistry`] enforces that no two observers own the
//! same path, runs every observer once per pass and folds the fragments
//! into the next committed tree.

use crate::config::ObserverConfig;
use crate::error::{ObserveError, Result};
use crate::events::EventRecorder;
use crate::external_oidc::ExternalOidcObserver;
use crate::feature_gates::{FeatureGateAccess, FeatureGates};
use crate::lookup::StateLookup;
use crate::merge::merge_owned;
use crate::path_tree::{display_path, PathTree, StaticPath};
use crate::resource_sync::ResourceSyncer;
use crate::rolebinding_restrictions::RoleBindingRestrictionsObserver;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Collaborators available to observers during a pass
#[derive(Clone, Copy)]
pub struct ObserverContext<'a> {
    /// Point-in-time cluster state
    pub lookup: &'a dyn StateLookup,
    /// Feature gate capability
    pub gates: &'a dyn FeatureGateAccess,
    /// Receiver of mirror requests
    pub syncer: &'a dyn ResourceSyncer,
    /// Change notification sink
    pub recorder: &'a dyn EventRecorder,
    pub config: &'a ObserverConfig,
}

impl<'a> ObserverContext<'a> {
    /// Current gate set, or `None` before the initial snapshot was observed
    pub fn feature_gates(&self) -> Result<Option<FeatureGates>> {
        if !self.gates.are_initial_feature_gates_observed() {
            return Ok(None);
        }
        self.gates.current_feature_gates().map(Some)
    }
}

/// Result of a single observer invocation
#[derive(Debug)]
pub struct Observation {
    /// Fragment (or the existing tree when nothing may change)
    pub config: PathTree,
    pub errors: Vec<ObserveError>,
}

impl Observation {
    /// A freshly built fragment
    pub fn fragment(config: PathTree) -> Self {
        Self {
            config,
            errors: Vec::new(),
        }
    }

    /// Leave the existing configuration in place
    pub fn unchanged(existing: &PathTree) -> Self {
        Self::fragment(existing.clone())
    }

    /// Keep the existing configuration and report errors
    pub fn failed(existing: &PathTree, errors: Vec<ObserveError>) -> Self {
        Self {
            config: existing.clone(),
            errors,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A translation unit from cluster state to a configuration fragment
pub trait ConfigObserver: Send + Sync {
    /// Stable name, used as event reason and ownership key
    fn name(&self) -> &'static str;

    /// Paths this observer owns exclusively
    fn owned_paths(&self) -> &'static [StaticPath];

    /// Observe cluster state and return the owned fragment
    fn observe(&self, ctx: &ObserverContext<'_>, existing: &PathTree) -> Observation;
}

/// Metrics for observation passes
#[derive(Clone)]
pub struct ObserverMetrics {
    /// Counter for passes
    pub passes: metrics::Counter,
    /// Counter for observer errors
    pub errors: metrics::Counter,
    /// Counter for passes that changed the configuration
    pub changes: metrics::Counter,
    /// Histogram for pass duration
    pub duration: metrics::Histogram,
}

impl ObserverMetrics {
    /// Create new observer metrics
    pub fn new() -> Self {
        Self {
            passes: metrics::counter!("kas_observer_passes_total"),
            errors: metrics::counter!("kas_observer_pass_errors_total"),
            changes: metrics::counter!("kas_observer_config_changes_total"),
            duration: metrics::histogram!("kas_observer_pass_duration_seconds"),
        }
    }
}

impl Default for ObserverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one observation pass over all registered observers
#[derive(Debug)]
pub struct ObservedPass {
    /// Next committed configuration
    pub config: PathTree,
    /// Whether `config` differs from the existing tree
    pub changed: bool,
    /// Errors tagged with the name of the observer that produced them
    pub errors: Vec<(String, ObserveError)>,
}

impl ObservedPass {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Ordered set of observers with exclusive path ownership
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Box<dyn ConfigObserver>>,
    owners: Vec<(StaticPath, &'static str)>,
    metrics: Option<ObserverMetrics>,
}

/// Whether one path is equal to or nested inside the other
fn paths_overlap(a: &[&str], b: &[&str]) -> bool {
    let len = a.len().min(b.len());
    a[..len] == b[..len]
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the External OIDC and RoleBindingRestriction observers
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(ExternalOidcObserver)?;
        registry.register(RoleBindingRestrictionsObserver)?;
        Ok(registry)
    }

    /// Record pass metrics
    pub fn with_metrics(mut self, metrics: ObserverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add an observer; fails if any of its paths overlaps a registered one
    pub fn register(&mut self, observer: impl ConfigObserver + 'static) -> Result<()> {
        let name = observer.name();
        for path in observer.owned_paths() {
            if let Some((_, owner)) = self.owners.iter().find(|(p, _)| paths_overlap(p, path)) {
                return Err(ObserveError::PathOwnershipConflict {
                    path: display_path(path),
                    first: owner.to_string(),
                    second: name.to_string(),
                });
            }
        }

        self.owners
            .extend(observer.owned_paths().iter().map(|path| (*path, name)));
        self.observers.push(Box::new(observer));
        debug!(observer = name, "Registered config observer");
        Ok(())
    }

    /// Observer owning `path`, if any
    pub fn owner_of(&self, path: &[&str]) -> Option<&'static str> {
        self.owners
            .iter()
            .find(|(owned, _)| *owned == path)
            .map(|(_, owner)| *owner)
    }

    /// Names of registered observers, in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    /// Run every observer once and merge their fragments
    ///
    /// An observer that reports errors contributes the existing values of
    /// its owned paths, so previously committed configuration stays in
    /// place until the problem is resolved.
    #[instrument(skip_all, fields(observers = self.observers.len()))]
    pub fn observe(&self, ctx: &ObserverContext<'_>, existing: &PathTree) -> ObservedPass {
        let start = Instant::now();
        if let Some(ref metrics) = self.metrics {
            metrics.passes.increment(1);
        }

        let mut errors = Vec::new();
        let mut fragments = Vec::with_capacity(self.observers.len());
        for observer in &self.observers {
            let observation = observer.observe(ctx, existing);
            if observation.is_ok() {
                fragments.push((observer.owned_paths(), Some(observation.config)));
                continue;
            }

            for error in observation.errors {
                warn!(observer = observer.name(), error = %error, "Observer failed");
                errors.push((observer.name().to_string(), error));
            }
            fragments.push((observer.owned_paths(), None));
        }

        let contributions = fragments
            .iter()
            .map(|(owned, fragment)| (*owned, fragment.as_ref().unwrap_or(existing)));
        let config = match merge_owned(existing, contributions) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(error = %e, "Failed to merge observed fragments");
                errors.push(("registry".to_string(), e));
                existing.clone()
            }
        };

        let changed = config != existing.clone().pruned();
        if changed {
            info!("Observed configuration changed");
        } else {
            debug!("Observed configuration unchanged");
        }

        if let Some(ref metrics) = self.metrics {
            metrics.duration.record(start.elapsed().as_secs_f64());
            if !errors.is_empty() {
                metrics.errors.increment(errors.len() as u64);
            }
            if changed {
                metrics.changes.increment(1);
            }
        }

        ObservedPass {
            config,
            changed,
            errors,
        }
    }
}
