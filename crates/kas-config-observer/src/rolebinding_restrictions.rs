//! RoleBindingRestriction admission plugin observer
//!
//! The RoleBindingRestriction plugins are enabled in the default apiserver
//! configuration. They only make sense with the built-in OAuth stack, so
//! this observer disables them whenever the cluster uses another
//! authentication type. It never enables them explicitly.
//!
//! `disable-admission-plugins` is shared with other configuration sources,
//! so entries this observer does not own are always carried through.
//!
//! A missing `authentications.config.openshift.io/cluster` is only logged.
//! Unlike the event-per-pass behavior of the operator this replaces, no
//! event is recorded for it: events follow changes of the owned plugin
//! entries, so a resource that stays absent keeps every pass quiet.

use crate::crd::AUTHENTICATION_RESOURCE_NAME;
use crate::merge::{retract, union_sorted, API_SERVER_ARGUMENTS};
use crate::observer::{ConfigObserver, Observation, ObserverContext};
use crate::path_tree::{PathTree, StaticPath};
use tracing::{debug, info, warn};

/// Observer name, also the event reason
pub const OBSERVER_NAME: &str = "ObserveRoleBindingRestrictions";

pub const DISABLE_ADMISSION_PLUGINS: StaticPath =
    &[API_SERVER_ARGUMENTS, "disable-admission-plugins"];

/// Plugins backing the RoleBindingRestriction API
pub const RBR_PLUGINS: [&str; 2] = [
    "authorization.openshift.io/RestrictSubjectBindings",
    "authorization.openshift.io/ValidateRoleBindingRestriction",
];

const OWNED_PATHS: &[StaticPath] = &[DISABLE_ADMISSION_PLUGINS];

const EVENT_DISABLED: &str = "RoleBindingRestriction admission plugins disabled";
const EVENT_ENABLED: &str = "RoleBindingRestriction admission plugins re-enabled";

/// Disables the RoleBindingRestriction plugins outside the built-in OAuth stack
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleBindingRestrictionsObserver;

impl ConfigObserver for RoleBindingRestrictionsObserver {
    fn name(&self) -> &'static str {
        OBSERVER_NAME
    }

    fn owned_paths(&self) -> &'static [StaticPath] {
        OWNED_PATHS
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &PathTree) -> Observation {
        let disable = match ctx.lookup.authentication(AUTHENTICATION_RESOURCE_NAME) {
            Ok(Some(auth)) => !auth.spec.r#type.is_integrated_oauth(),
            Ok(None) => {
                warn!(
                    observer = OBSERVER_NAME,
                    name = AUTHENTICATION_RESOURCE_NAME,
                    "authentications.config.openshift.io not found"
                );
                false
            }
            Err(e) => return Observation::failed(existing, vec![e]),
        };

        let current = match existing.get_list(DISABLE_ADMISSION_PLUGINS) {
            Ok(current) => current.unwrap_or_default(),
            Err(e) => return Observation::failed(existing, vec![e]),
        };

        let observed = if disable {
            union_sorted(current, &RBR_PLUGINS)
        } else {
            retract(current, &RBR_PLUGINS)
        };

        let mut fragment = PathTree::new();
        if let Err(e) = fragment.set_list(DISABLE_ADMISSION_PLUGINS, observed.iter().cloned()) {
            return Observation::failed(existing, vec![e]);
        }

        let owned = |plugins: &[String]| -> Vec<bool> {
            RBR_PLUGINS
                .iter()
                .map(|p| plugins.iter().any(|entry| entry == p))
                .collect()
        };
        if owned(current) != owned(observed.as_slice()) {
            let message = if disable { EVENT_DISABLED } else { EVENT_ENABLED };
            info!(observer = OBSERVER_NAME, disable, "{}", message);
            ctx.recorder.event(OBSERVER_NAME, message);
        } else {
            debug!(observer = OBSERVER_NAME, disable, "Admission plugins unchanged");
        }

        Observation::fragment(fragment.pruned())
    }
}
