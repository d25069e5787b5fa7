//! # KAS Config Observer
//!
//! Config observers that derive kube-apiserver arguments from cluster
//! authentication state.
//!
//! Each observer translates one slice of cluster state into a fragment of
//! the apiserver configuration. The fragments are merged, diffed against
//! the previously committed configuration, and auxiliary resources such as
//! the OIDC issuer CA bundle are mirrored into the apiserver namespace
//! only when their content changed. A pass with unchanged inputs produces
//! no writes, no mirror changes and no events.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kas_config_observer::prelude::*;
//!
//! let lookup = ClusterSnapshot::load("cluster.yaml")?;
//! let gates = HardcodedFeatureGateAccess::new([FEATURE_GATE_EXTERNAL_OIDC], []);
//! let syncer = ResourceSyncController::new(DEFAULT_TARGET_NAMESPACE);
//! let recorder = InMemoryRecorder::new();
//! let config = ObserverConfig::default();
//!
//! let ctx = ObserverContext {
//!     lookup: &lookup,
//!     gates: &gates,
//!     syncer: &syncer,
//!     recorder: &recorder,
//!     config: &config,
//! };
//!
//! let registry = ObserverRegistry::with_defaults()?;
//! let pass = registry.observe(&ctx, &PathTree::new());
//! println!("{}", pass.config);
//! ```
//!
//! ## Observers
//!
//! - **External OIDC** (`ObserveExternalOIDC`): `--oidc-*` arguments or
//!   `--authentication-config`, plus CA bundle mirroring
//! - **RoleBindingRestriction** (`ObserveRoleBindingRestrictions`):
//!   disables the RoleBindingRestriction admission plugins outside the
//!   built-in OAuth stack
//!
//! ## Modules
//!
//! - [`observer`] - Observer contract and registry
//! - [`path_tree`] - Nested key-path configuration document
//! - [`merge`] - Owned-path diffing and fragment merging
//! - [`resource_sync`] - Content-based ConfigMap mirroring
//! - [`external_oidc`] - External OIDC observer
//! - [`rolebinding_restrictions`] - RoleBindingRestriction plugin observer
//! - [`crd`] - `Authentication` custom resource with boundary validation
//! - [`lookup`] - Read-only cluster state access
//! - [`feature_gates`] - Injected feature gate capability
//! - [`events`] - Change notification sinks
//! - [`config`] - Observer configuration
//! - [`error`] - Error types
//!
//! ## Metrics
//!
//! When the registry is built with [`observer::ObserverMetrics`]:
//!
//! - `kas_observer_passes_total` - Observation passes
//! - `kas_observer_pass_errors_total` - Observer errors
//! - `kas_observer_config_changes_total` - Passes that changed the configuration
//! - `kas_observer_pass_duration_seconds` - Pass latency

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod external_oidc;
pub mod feature_gates;
pub mod lookup;
pub mod merge;
pub mod observer;
pub mod path_tree;
pub mod resource_sync;
pub mod rolebinding_restrictions;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::config::{MirroredFile, ObserverConfig, DEFAULT_TARGET_NAMESPACE};
    pub use crate::crd::{
        Authentication, AuthenticationSpec, AuthenticationType, OidcClientConfig, OidcProvider,
        TokenClaimMappings, TokenClaimValidationRule, TokenIssuer, UsernamePrefixPolicy,
    };
    pub use crate::error::{ObserveError, Result};
    pub use crate::events::{EventRecorder, InMemoryRecorder, LoggingRecorder, RecordedEvent};
    pub use crate::external_oidc::ExternalOidcObserver;
    pub use crate::feature_gates::{
        FeatureGateAccess, FeatureGateTracker, FeatureGates, HardcodedFeatureGateAccess,
        FEATURE_GATE_EXTERNAL_OIDC, FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED,
    };
    pub use crate::lookup::{ClusterSnapshot, StateLookup};
    pub use crate::observer::{
        ConfigObserver, ObservedPass, Observation, ObserverContext, ObserverMetrics,
        ObserverRegistry,
    };
    pub use crate::path_tree::{Node, PathTree, Scalar, StaticPath};
    pub use crate::resource_sync::{
        config_map_needs_sync, plan_config_map_removal, plan_config_map_sync,
        sync_config_map_if_needed, MirrorOutcome, MirrorPlan, ResourceLocation,
        ResourceSyncController, ResourceSyncer,
    };
    pub use crate::rolebinding_restrictions::RoleBindingRestrictionsObserver;
}
