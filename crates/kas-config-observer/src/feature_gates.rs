//! Feature gate access
//!
//! Observers never read gates from global state. A [`FeatureGateAccess`]
//! capability is injected through the observer context so tests can hand
//! in a fixed snapshot.
//!
//! The accessor answers two separate questions: whether any gate snapshot
//! has been observed yet, and which gates the current snapshot enables.
//! Observers must ask the first question before the second, otherwise a
//! gate that is merely unknown at startup would read as disabled.

use crate::error::{ObserveError, Result};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Enables the External OIDC observer
pub const FEATURE_GATE_EXTERNAL_OIDC: &str = "ExternalOIDC";

/// Enables the structured authentication-config mode of the External OIDC observer
pub const FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED: &str = "ExternalOIDCWithUIDAndExtraClaimMappings";

/// Snapshot of enabled and disabled feature gates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGates {
    enabled: BTreeSet<String>,
    disabled: BTreeSet<String>,
}

impl FeatureGates {
    /// Build a gate set from enabled and disabled gate names
    pub fn new<E, D, S>(enabled: E, disabled: D) -> Self
    where
        E: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the named gate is enabled; gates unknown to the snapshot are off
    pub fn enabled(&self, name: &str) -> bool {
        if self.enabled.contains(name) {
            return true;
        }
        if !self.disabled.contains(name) {
            debug!(gate = %name, "Feature gate not present in snapshot, treating as disabled");
        }
        false
    }

    /// Names of all enabled gates
    pub fn enabled_gates(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}

/// Read access to the cluster feature gates
pub trait FeatureGateAccess: Send + Sync {
    /// Whether a gate snapshot has been observed at least once
    fn are_initial_feature_gates_observed(&self) -> bool;

    /// The current gate snapshot
    fn current_feature_gates(&self) -> Result<FeatureGates>;
}

/// Fixed gate snapshot, observed from the start
#[derive(Debug, Clone)]
pub struct HardcodedFeatureGateAccess {
    gates: FeatureGates,
}

impl HardcodedFeatureGateAccess {
    pub fn new<E, D, S>(enabled: E, disabled: D) -> Self
    where
        E: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gates: FeatureGates::new(enabled, disabled),
        }
    }
}

impl FeatureGateAccess for HardcodedFeatureGateAccess {
    fn are_initial_feature_gates_observed(&self) -> bool {
        true
    }

    fn current_feature_gates(&self) -> Result<FeatureGates> {
        Ok(self.gates.clone())
    }
}

/// Gate accessor fed by an external watch
///
/// Starts out unobserved; the first call to [`FeatureGateTracker::observe`]
/// flips the initial-snapshot flag for the rest of the process lifetime.
#[derive(Debug, Default)]
pub struct FeatureGateTracker {
    current: RwLock<Option<FeatureGates>>,
}

impl FeatureGateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new gate snapshot
    pub fn observe(&self, gates: FeatureGates) {
        let mut current = self.current.write();
        if current.is_none() {
            info!(
                enabled = ?gates.enabled_gates().collect::<Vec<_>>(),
                "Initial feature gates observed"
            );
        } else if current.as_ref() != Some(&gates) {
            info!(
                enabled = ?gates.enabled_gates().collect::<Vec<_>>(),
                "Feature gates changed"
            );
        }
        *current = Some(gates);
    }
}

impl FeatureGateAccess for FeatureGateTracker {
    fn are_initial_feature_gates_observed(&self) -> bool {
        self.current.read().is_some()
    }

    fn current_feature_gates(&self) -> Result<FeatureGates> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| ObserveError::FeatureGates("no feature gates observed yet".to_string()))
    }
}
