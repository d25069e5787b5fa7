//! External OIDC observer
//!
//! Watches `authentications.config.openshift.io/cluster` and, when the
//! cluster authenticates against an external OIDC provider, configures
//! the apiserver through `--oidc-*` arguments. With the structured
//! authentication gate enabled and a generated `auth-config` present, a
//! single `--authentication-config` file replaces the individual flags.
//!
//! The issuer CA bundle (and the structured config, when used) are
//! mirrored into the workload namespace so they can be mounted as static
//! files on every node.

use crate::crd::{
    validate_authentication_spec, AuthenticationSpec, AuthenticationType, OidcProvider,
    TokenValidationRuleType, UsernamePrefixPolicy, AUTHENTICATION_RESOURCE_NAME,
};
use crate::error::{ObserveError, Result};
use crate::feature_gates::FeatureGates;
use crate::merge::{diff_and_build, API_SERVER_ARGUMENTS};
use crate::observer::{ConfigObserver, Observation, ObserverContext};
use crate::path_tree::{PathTree, StaticPath};
use crate::resource_sync::{
    plan_config_map_removal, plan_config_map_sync, MirrorOutcome, ResourceLocation,
};
use tracing::{debug, info, warn};
use url::Url;

/// Observer name, also the event reason
pub const OBSERVER_NAME: &str = "ObserveExternalOIDC";

pub const OIDC_ISSUER_URL: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-issuer-url"];
pub const OIDC_CLIENT_ID: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-client-id"];
pub const OIDC_USERNAME_CLAIM: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-username-claim"];
pub const OIDC_USERNAME_PREFIX: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-username-prefix"];
pub const OIDC_GROUPS_CLAIM: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-groups-claim"];
pub const OIDC_GROUPS_PREFIX: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-groups-prefix"];
pub const OIDC_REQUIRED_CLAIM: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-required-claim"];
pub const OIDC_CA_FILE: StaticPath = &[API_SERVER_ARGUMENTS, "oidc-ca-file"];
pub const AUTHENTICATION_CONFIG: StaticPath = &[API_SERVER_ARGUMENTS, "authentication-config"];

/// Every path this observer owns
pub const OWNED_PATHS: &[StaticPath] = &[
    OIDC_ISSUER_URL,
    OIDC_CLIENT_ID,
    OIDC_USERNAME_CLAIM,
    OIDC_USERNAME_PREFIX,
    OIDC_GROUPS_CLAIM,
    OIDC_GROUPS_PREFIX,
    OIDC_REQUIRED_CLAIM,
    OIDC_CA_FILE,
    AUTHENTICATION_CONFIG,
];

/// `--oidc-username-prefix` value that disables prefixing
const NO_PREFIX: &str = "-";

const EVENT_REMOVED: &str = "Removed ExternalOIDC configuration";
const EVENT_CA_SYNCED: &str = "ExternalOIDC CA bundle configmap synced";
const EVENT_CA_REMOVED: &str = "ExternalOIDC CA bundle configmap removed";
const EVENT_AUTH_CONFIG_SYNCED: &str = "ExternalOIDC authentication config configmap synced";
const EVENT_AUTH_CONFIG_REMOVED: &str = "ExternalOIDC authentication config configmap removed";
const EVENT_CHANGED: &str = "ExternalOIDC configuration changed";

/// Translates an external OIDC provider into apiserver arguments
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalOidcObserver;

impl ConfigObserver for ExternalOidcObserver {
    fn name(&self) -> &'static str {
        OBSERVER_NAME
    }

    fn owned_paths(&self) -> &'static [StaticPath] {
        OWNED_PATHS
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &PathTree) -> Observation {
        let gates = match ctx.feature_gates() {
            Ok(Some(gates)) => gates,
            Ok(None) => {
                debug!(observer = OBSERVER_NAME, "Feature gates not observed yet");
                return Observation::unchanged(existing);
            }
            Err(e) => return Observation::failed(existing, vec![e]),
        };
        if !gates.enabled(&ctx.config.external_oidc_gate) {
            return Observation::unchanged(existing);
        }

        let auth = match ctx.lookup.authentication(AUTHENTICATION_RESOURCE_NAME) {
            Ok(Some(auth)) => auth,
            Ok(None) => {
                warn!(
                    observer = OBSERVER_NAME,
                    name = AUTHENTICATION_RESOURCE_NAME,
                    "authentications.config.openshift.io not found"
                );
                return reset(ctx, existing);
            }
            Err(e) => return Observation::failed(existing, vec![e]),
        };

        match auth.spec.r#type {
            AuthenticationType::Unset
            | AuthenticationType::IntegratedOAuth
            | AuthenticationType::None => reset(ctx, existing),
            AuthenticationType::Oidc => observe_oidc(ctx, &gates, &auth.spec, existing),
        }
    }
}

fn ca_bundle_target(ctx: &ObserverContext<'_>) -> ResourceLocation {
    ResourceLocation::new(&ctx.config.target_namespace, &ctx.config.ca_bundle.config_map)
}

fn auth_config_target(ctx: &ObserverContext<'_>) -> ResourceLocation {
    ResourceLocation::new(&ctx.config.target_namespace, &ctx.config.auth_config.config_map)
}

/// Drop all OIDC configuration and the mirrored resources
fn reset(ctx: &ObserverContext<'_>, existing: &PathTree) -> Observation {
    let plans = [ca_bundle_target(ctx), auth_config_target(ctx)]
        .iter()
        .map(|target| plan_config_map_removal(ctx.lookup, target))
        .collect::<Result<Vec<_>>>();
    let plans = match plans {
        Ok(plans) => plans,
        Err(e) => return Observation::failed(existing, vec![e]),
    };

    let configured = match existing.contains_any_list(OWNED_PATHS) {
        Ok(configured) => configured,
        Err(e) => return Observation::failed(existing, vec![e]),
    };

    for plan in plans {
        if let Err(e) = plan.issue(ctx.syncer) {
            return Observation::failed(existing, vec![e]);
        }
    }
    if configured {
        info!(observer = OBSERVER_NAME, "Removing ExternalOIDC configuration");
        ctx.recorder.event(OBSERVER_NAME, EVENT_REMOVED);
    }

    Observation::fragment(PathTree::new())
}

/// Event announcing a mirror outcome, if there is anything to announce
fn mirror_event(
    outcome: MirrorOutcome,
    synced: &'static str,
    removed: &'static str,
) -> Option<&'static str> {
    match outcome {
        MirrorOutcome::Unchanged => None,
        MirrorOutcome::Synced => Some(synced),
        MirrorOutcome::Removed => Some(removed),
    }
}

fn observe_oidc(
    ctx: &ObserverContext<'_>,
    gates: &FeatureGates,
    spec: &AuthenticationSpec,
    existing: &PathTree,
) -> Observation {
    if let Err(e) = validate_authentication_spec(spec) {
        return Observation::failed(existing, vec![e]);
    }

    let [provider] = spec.oidc_providers.as_slice() else {
        return Observation::failed(
            existing,
            vec![ObserveError::SchemaViolation(
                "exactly one OIDC provider must be configured in authentication.config/cluster resource"
                    .to_string(),
            )],
        );
    };

    let structured = if gates.enabled(&ctx.config.structured_auth_gate) {
        match ctx
            .lookup
            .config_map(&ctx.config.managed_config_namespace, &ctx.config.auth_config_source)
        {
            Ok(source) => source.is_some(),
            Err(e) => return Observation::failed(existing, vec![e]),
        }
    } else {
        false
    };

    let (legacy, errors) = match legacy_arguments(ctx, provider, structured) {
        Ok(result) => result,
        Err(e) => return Observation::failed(existing, vec![e]),
    };
    if !errors.is_empty() {
        // nothing is mirrored or announced until the provider is fixed
        return Observation::failed(existing, errors);
    }

    let candidate = if structured {
        let mut tree = PathTree::new();
        if let Err(e) = tree.set_list(AUTHENTICATION_CONFIG, [ctx.config.auth_config.path.as_str()]) {
            return Observation::failed(existing, vec![e]);
        }
        tree
    } else {
        legacy
    };

    let ca_source = if provider.issuer.certificate_authority.name.is_empty() {
        ResourceLocation::empty()
    } else {
        ResourceLocation::new(
            &ctx.config.config_namespace,
            &provider.issuer.certificate_authority.name,
        )
    };
    let ca_plan = if ca_source.is_empty() {
        plan_config_map_removal(ctx.lookup, &ca_bundle_target(ctx))
    } else {
        plan_config_map_sync(
            ctx.lookup,
            &ca_bundle_target(ctx),
            &ca_source,
            Some(&ctx.config.ca_bundle.key),
        )
    };
    let auth_config_plan = if structured {
        plan_config_map_sync(
            ctx.lookup,
            &auth_config_target(ctx),
            &ResourceLocation::new(
                &ctx.config.managed_config_namespace,
                &ctx.config.auth_config_source,
            ),
            Some(&ctx.config.auth_config.key),
        )
    } else {
        plan_config_map_removal(ctx.lookup, &auth_config_target(ctx))
    };

    let (ca_plan, auth_config_plan) = match (ca_plan, auth_config_plan) {
        (Ok(ca), Ok(auth_config)) => (ca, auth_config),
        (ca, auth_config) => {
            let errors = [ca.err(), auth_config.err()].into_iter().flatten().collect();
            return Observation::failed(existing, errors);
        }
    };

    let outcome = match diff_and_build(existing, &candidate, OWNED_PATHS) {
        Ok(outcome) => outcome,
        Err(e) => return Observation::failed(existing, vec![e]),
    };

    let issued = ca_plan.issue(ctx.syncer).and_then(|ca| {
        auth_config_plan
            .issue(ctx.syncer)
            .map(|auth_config| (ca, auth_config))
    });
    let (ca_outcome, auth_config_outcome) = match issued {
        Ok(outcomes) => outcomes,
        Err(e) => return Observation::failed(existing, vec![e]),
    };

    let events = [
        mirror_event(ca_outcome, EVENT_CA_SYNCED, EVENT_CA_REMOVED),
        mirror_event(auth_config_outcome, EVENT_AUTH_CONFIG_SYNCED, EVENT_AUTH_CONFIG_REMOVED),
    ];
    for message in events.into_iter().flatten() {
        debug!(observer = OBSERVER_NAME, "{}", message);
        ctx.recorder.event(OBSERVER_NAME, message);
    }
    if outcome.changed {
        info!(observer = OBSERVER_NAME, structured, "ExternalOIDC configuration changed");
        ctx.recorder.event(OBSERVER_NAME, EVENT_CHANGED);
    }

    Observation::fragment(outcome.fragment)
}

/// Build the `--oidc-*` arguments for `provider`
///
/// Field problems are collected rather than returned early so a single
/// pass reports all of them. The outer `Err` is reserved for failures to
/// build the tree itself.
fn legacy_arguments(
    ctx: &ObserverContext<'_>,
    provider: &OidcProvider,
    structured: bool,
) -> Result<(PathTree, Vec<ObserveError>)> {
    let mut tree = PathTree::new();
    let mut errors = Vec::new();

    let Some(client) =
        provider.client_for(&ctx.config.component_name, &ctx.config.target_namespace)
    else {
        return Ok((
            tree,
            vec![ObserveError::SchemaViolation(format!(
                "no OIDC client config found for component {}/{}",
                ctx.config.component_name, ctx.config.target_namespace
            ))],
        ));
    };

    match Url::parse(&provider.issuer.url) {
        Err(e) => errors.push(ObserveError::invalid_field("issuer.issuerURL", e.to_string())),
        Ok(url) if url.scheme() != "https" => errors.push(ObserveError::invalid_field(
            "issuer.issuerURL",
            "https is required for provider URL",
        )),
        Ok(_) => tree.set_list(OIDC_ISSUER_URL, [provider.issuer.url.as_str()])?,
    }

    if client.client_id.is_empty() {
        errors.push(ObserveError::invalid_field(
            "oidcClients.clientID",
            "OIDC client ID not set",
        ));
    } else {
        tree.set_list(OIDC_CLIENT_ID, [client.client_id.as_str()])?;
    }

    let mappings = &provider.claim_mappings;
    if !mappings.username.claim.is_empty() {
        tree.set_list(OIDC_USERNAME_CLAIM, [mappings.username.claim.as_str()])?;
    }
    if !mappings.groups.claim.is_empty() {
        tree.set_list(OIDC_GROUPS_CLAIM, [mappings.groups.claim.as_str()])?;
    }
    if !mappings.groups.prefix.is_empty() {
        tree.set_list(OIDC_GROUPS_PREFIX, [mappings.groups.prefix.as_str()])?;
    }

    match mappings.username.prefix_policy {
        UsernamePrefixPolicy::NoOpinion => {}
        UsernamePrefixPolicy::NoPrefix => tree.set_list(OIDC_USERNAME_PREFIX, [NO_PREFIX])?,
        UsernamePrefixPolicy::Prefix => match &mappings.username.prefix {
            Some(prefix) => {
                tree.set_list(OIDC_USERNAME_PREFIX, [prefix.prefix_string.as_str()])?
            }
            None => errors.push(ObserveError::invalid_field(
                "claimMappings.username.prefix",
                "nil username prefix while policy expects one",
            )),
        },
    }

    // structured config expresses every rule type itself
    if !structured {
        let mut required_claims = Vec::with_capacity(provider.claim_validation_rules.len());
        for (i, rule) in provider.claim_validation_rules.iter().enumerate() {
            let field = format!("claimValidationRules[{}]", i);
            let mut valid = true;
            if rule.r#type != TokenValidationRuleType::RequiredClaim {
                valid = false;
                errors.push(ObserveError::invalid_field(
                    &field,
                    format!("invalid claim validation rule type: {}", rule.r#type),
                ));
            }
            match &rule.required_claim {
                Some(claim) if valid => required_claims.push(claim.to_arg()),
                Some(_) => {}
                None => errors.push(ObserveError::invalid_field(
                    &field,
                    format!("empty validation rule at index {}", i),
                )),
            }
        }
        tree.set_list(OIDC_REQUIRED_CLAIM, required_claims)?;
    }

    if !provider.issuer.certificate_authority.name.is_empty() {
        tree.set_list(OIDC_CA_FILE, [ctx.config.ca_bundle.path.as_str()])?;
    }

    Ok((tree.pruned(), errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObserverConfig;
    use crate::crd::{
        Authentication, ConfigMapNameReference, OidcClientConfig, TokenClaimValidationCelRule,
        TokenClaimValidationRule, TokenIssuer, TokenRequiredClaim, UsernamePrefix,
    };
    use crate::events::InMemoryRecorder;
    use crate::feature_gates::{
        FeatureGateTracker, HardcodedFeatureGateAccess, FEATURE_GATE_EXTERNAL_OIDC,
        FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED,
    };
    use crate::lookup::{config_map_with_data, ClusterSnapshot, StateLookup};
    use crate::resource_sync::ResourceSyncController;
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::Arc;

    const TARGET_NS: &str = "openshift-kube-apiserver";
    const CA_PATH: &str =
        "/etc/kubernetes/static-pod-resources/configmaps/oidc-serving-ca-bundle/ca-bundle.crt";

    struct Harness {
        lookup: ClusterSnapshot,
        gates: HardcodedFeatureGateAccess,
        syncer: ResourceSyncController,
        recorder: InMemoryRecorder,
        config: ObserverConfig,
    }

    impl Harness {
        fn new(lookup: ClusterSnapshot) -> Self {
            Self::with_gates(lookup, &[FEATURE_GATE_EXTERNAL_OIDC])
        }

        fn with_gates(lookup: ClusterSnapshot, enabled: &[&str]) -> Self {
            Self {
                lookup,
                gates: HardcodedFeatureGateAccess::new(enabled.iter().copied(), []),
                syncer: ResourceSyncController::new(TARGET_NS),
                recorder: InMemoryRecorder::new(),
                config: ObserverConfig::default(),
            }
        }

        fn ctx(&self) -> ObserverContext<'_> {
            ObserverContext {
                lookup: &self.lookup,
                gates: &self.gates,
                syncer: &self.syncer,
                recorder: &self.recorder,
                config: &self.config,
            }
        }

        fn observe(&self, existing: &PathTree) -> Observation {
            ExternalOidcObserver.observe(&self.ctx(), existing)
        }

        fn ca_rule(&self) -> Option<ResourceLocation> {
            self.syncer
                .rule_for(&ResourceLocation::new(TARGET_NS, "oidc-serving-ca-bundle"))
        }
    }

    fn provider() -> OidcProvider {
        OidcProvider {
            name: "idp".to_string(),
            issuer: TokenIssuer {
                url: "https://idp.example.com".to_string(),
                ..Default::default()
            },
            oidc_clients: vec![OidcClientConfig {
                component_name: "kube-apiserver".to_string(),
                component_namespace: TARGET_NS.to_string(),
                client_id: "abc".to_string(),
                extra_scopes: vec![],
            }],
            ..Default::default()
        }
    }

    fn auth(r#type: AuthenticationType, providers: Vec<OidcProvider>) -> Authentication {
        Authentication::new(
            AUTHENTICATION_RESOURCE_NAME,
            AuthenticationSpec {
                r#type,
                oidc_providers: providers,
            },
        )
    }

    fn oidc(provider: OidcProvider) -> ClusterSnapshot {
        ClusterSnapshot::new().with_authentication(auth(AuthenticationType::Oidc, vec![provider]))
    }

    fn list(tree: &PathTree, path: StaticPath) -> Option<Vec<String>> {
        tree.get_list(path).unwrap().map(<[String]>::to_vec)
    }

    fn existing_oidc() -> PathTree {
        let mut tree = PathTree::new();
        tree.set_list(OIDC_ISSUER_URL, ["https://idp.example.com"]).unwrap();
        tree.set_list(OIDC_CLIENT_ID, ["abc"]).unwrap();
        tree.set_list(OIDC_CA_FILE, [CA_PATH]).unwrap();
        tree
    }

    fn has_invalid_field(observation: &Observation, reason: &str) -> bool {
        observation
            .errors
            .iter()
            .any(|e| matches!(e, ObserveError::InvalidField { reason: r, .. } if r == reason))
    }

    #[test]
    fn test_username_claim_without_prefix_policy() {
        let mut p = provider();
        p.claim_mappings.username.claim = "sub".to_string();
        let harness = Harness::new(oidc(p));

        let observation = harness.observe(&PathTree::new());
        assert!(observation.is_ok(), "{:?}", observation.errors);

        let config = &observation.config;
        assert_eq!(list(config, OIDC_ISSUER_URL), Some(vec!["https://idp.example.com".to_string()]));
        assert_eq!(list(config, OIDC_CLIENT_ID), Some(vec!["abc".to_string()]));
        assert_eq!(list(config, OIDC_USERNAME_CLAIM), Some(vec!["sub".to_string()]));
        assert!(config.get(OIDC_USERNAME_PREFIX).is_none());
        assert!(harness
            .recorder
            .messages()
            .contains(&EVENT_CHANGED.to_string()));
    }

    #[test]
    fn test_no_prefix_policy_renders_dash() {
        let mut p = provider();
        p.claim_mappings.username.claim = "sub".to_string();
        p.claim_mappings.username.prefix_policy = UsernamePrefixPolicy::NoPrefix;
        let harness = Harness::new(oidc(p));

        let observation = harness.observe(&PathTree::new());
        assert!(observation.is_ok());
        assert_eq!(list(&observation.config, OIDC_USERNAME_PREFIX), Some(vec!["-".to_string()]));
    }

    #[test]
    fn test_prefix_policy() {
        let mut p = provider();
        p.claim_mappings.username.prefix_policy = UsernamePrefixPolicy::Prefix;
        p.claim_mappings.username.prefix = Some(UsernamePrefix {
            prefix_string: "oidc:".to_string(),
        });
        let harness = Harness::new(oidc(p.clone()));
        let observation = harness.observe(&PathTree::new());
        assert_eq!(
            list(&observation.config, OIDC_USERNAME_PREFIX),
            Some(vec!["oidc:".to_string()])
        );

        p.claim_mappings.username.prefix = None;
        let harness = Harness::new(oidc(p));
        let existing = existing_oidc();
        let observation = harness.observe(&existing);
        assert_eq!(observation.config, existing);
        assert!(has_invalid_field(&observation, "nil username prefix while policy expects one"));
    }

    #[test]
    fn test_groups_and_required_claims() {
        let mut p = provider();
        p.claim_mappings.groups.claim = "groups".to_string();
        p.claim_mappings.groups.prefix = "oidc-".to_string();
        p.claim_validation_rules = vec![
            TokenClaimValidationRule {
                required_claim: Some(TokenRequiredClaim {
                    claim: "aud".to_string(),
                    required_value: "kas".to_string(),
                }),
                ..Default::default()
            },
            TokenClaimValidationRule {
                required_claim: Some(TokenRequiredClaim {
                    claim: "tenant".to_string(),
                    required_value: "a".to_string(),
                }),
                ..Default::default()
            },
        ];
        let harness = Harness::new(oidc(p));

        let observation = harness.observe(&PathTree::new());
        assert!(observation.is_ok());
        let config = &observation.config;
        assert_eq!(list(config, OIDC_GROUPS_CLAIM), Some(vec!["groups".to_string()]));
        assert_eq!(list(config, OIDC_GROUPS_PREFIX), Some(vec!["oidc-".to_string()]));
        assert_eq!(
            list(config, OIDC_REQUIRED_CLAIM),
            Some(vec!["aud=kas".to_string(), "tenant=a".to_string()])
        );
    }

    #[test]
    fn test_invalid_rules_accumulate() {
        let mut p = provider();
        p.oidc_clients[0].client_id.clear();
        p.claim_validation_rules = vec![
            TokenClaimValidationRule {
                r#type: TokenValidationRuleType::Cel,
                cel: Some(TokenClaimValidationCelRule {
                    expression: "claims.aud == 'kas'".to_string(),
                    message: String::new(),
                }),
                ..Default::default()
            },
            TokenClaimValidationRule::default(),
        ];
        let harness = Harness::new(oidc(p));
        let existing = existing_oidc();

        let observation = harness.observe(&existing);
        assert_eq!(observation.config, existing);
        assert_eq!(observation.errors.len(), 4);
        assert!(has_invalid_field(&observation, "OIDC client ID not set"));
        assert!(has_invalid_field(&observation, "invalid claim validation rule type: CEL"));
        assert!(has_invalid_field(&observation, "empty validation rule at index 0"));
        assert!(has_invalid_field(&observation, "empty validation rule at index 1"));
        assert!(harness.recorder.events().is_empty());
        assert!(harness.syncer.rules().is_empty());
    }

    #[test]
    fn test_issuer_must_be_https() {
        let mut p = provider();
        p.issuer.url = "http://idp.example.com".to_string();
        let harness = Harness::new(oidc(p));
        let observation = harness.observe(&PathTree::new());
        assert!(has_invalid_field(&observation, "https is required for provider URL"));

        let mut p = provider();
        p.issuer.url = "not a url".to_string();
        let harness = Harness::new(oidc(p));
        let observation = harness.observe(&PathTree::new());
        assert_eq!(observation.errors.len(), 1);
        assert!(observation.config.is_empty());
    }

    #[test]
    fn test_exactly_one_provider() {
        let lookup = ClusterSnapshot::new()
            .with_authentication(auth(AuthenticationType::Oidc, vec![provider(), provider()]));
        let harness = Harness::new(lookup);
        let existing = existing_oidc();

        let observation = harness.observe(&existing);
        assert_eq!(observation.config, existing);
        assert_eq!(observation.errors.len(), 1);
        assert!(matches!(observation.errors[0], ObserveError::SchemaViolation(_)));

        let lookup =
            ClusterSnapshot::new().with_authentication(auth(AuthenticationType::Oidc, vec![]));
        let observation = Harness::new(lookup).observe(&existing);
        assert_eq!(observation.errors.len(), 1);
    }

    #[test]
    fn test_missing_client_config() {
        let mut p = provider();
        p.oidc_clients[0].component_namespace = "elsewhere".to_string();
        let harness = Harness::new(oidc(p));
        let observation = harness.observe(&PathTree::new());
        assert_eq!(observation.errors.len(), 1);
        assert!(observation.errors[0]
            .to_string()
            .contains("no OIDC client config found for component kube-apiserver/openshift-kube-apiserver"));
    }

    #[test]
    fn test_ca_bundle_mirrored() {
        let mut p = provider();
        p.issuer.certificate_authority = ConfigMapNameReference {
            name: "idp-ca".to_string(),
        };
        let lookup = oidc(p).with_config_map(config_map_with_data(
            "openshift-config",
            "idp-ca",
            [("ca-bundle.crt", "cert")],
        ));
        let harness = Harness::new(lookup);

        let observation = harness.observe(&PathTree::new());
        assert!(observation.is_ok());
        assert_eq!(list(&observation.config, OIDC_CA_FILE), Some(vec![CA_PATH.to_string()]));
        assert_eq!(
            harness.ca_rule(),
            Some(ResourceLocation::new("openshift-config", "idp-ca"))
        );
        assert_eq!(
            harness.recorder.messages(),
            vec![EVENT_CA_SYNCED.to_string(), EVENT_CHANGED.to_string()]
        );
    }

    #[test]
    fn test_ca_source_missing_is_error() {
        let mut p = provider();
        p.issuer.certificate_authority.name = "idp-ca".to_string();
        let lookup = oidc(p).with_config_map(config_map_with_data(
            TARGET_NS,
            "oidc-serving-ca-bundle",
            [("ca-bundle.crt", "old")],
        ));
        let harness = Harness::new(lookup);

        let observation = harness.observe(&PathTree::new());
        assert!(matches!(
            observation.errors.as_slice(),
            [ObserveError::SourceNotFound { .. }]
        ));
        assert!(harness.recorder.events().is_empty());
    }

    #[test]
    fn test_ca_reference_removed_deletes_mirror() {
        let lookup = oidc(provider()).with_config_map(config_map_with_data(
            TARGET_NS,
            "oidc-serving-ca-bundle",
            [("ca-bundle.crt", "old")],
        ));
        let harness = Harness::new(lookup);

        let observation = harness.observe(&existing_oidc());
        assert!(observation.is_ok());
        assert!(observation.config.get(OIDC_CA_FILE).is_none());
        assert_eq!(harness.ca_rule(), Some(ResourceLocation::empty()));
        assert_eq!(
            harness.recorder.messages(),
            vec![EVENT_CA_REMOVED.to_string(), EVENT_CHANGED.to_string()]
        );
    }

    #[test]
    fn test_integrated_oauth_removes_configuration() {
        let lookup = ClusterSnapshot::new()
            .with_authentication(auth(AuthenticationType::IntegratedOAuth, vec![]));
        let harness = Harness::new(lookup);

        let observation = harness.observe(&existing_oidc());
        assert!(observation.is_ok());
        assert!(observation.config.is_empty());
        assert_eq!(harness.recorder.messages(), vec![EVENT_REMOVED.to_string()]);
        assert_eq!(harness.ca_rule(), Some(ResourceLocation::empty()));

        // nothing left to remove
        harness.recorder.clear();
        let observation = harness.observe(&observation.config);
        assert!(observation.config.is_empty());
        assert!(harness.recorder.events().is_empty());
    }

    #[test]
    fn test_not_found_resets() {
        let harness = Harness::new(ClusterSnapshot::new());
        let observation = harness.observe(&existing_oidc());
        assert!(observation.is_ok());
        assert!(observation.config.is_empty());
        assert_eq!(harness.recorder.messages(), vec![EVENT_REMOVED.to_string()]);
        assert_eq!(harness.ca_rule(), Some(ResourceLocation::empty()));
    }

    #[test]
    fn test_gate_disabled_keeps_existing() {
        let harness = Harness::with_gates(oidc(provider()), &[]);
        let existing = existing_oidc();
        let observation = harness.observe(&existing);
        assert!(observation.is_ok());
        assert_eq!(observation.config, existing);
        assert!(harness.syncer.rules().is_empty());
    }

    #[test]
    fn test_gates_not_observed_keeps_existing() {
        let tracker = FeatureGateTracker::new();
        let harness = Harness::new(ClusterSnapshot::new());
        let ctx = ObserverContext {
            gates: &tracker,
            ..harness.ctx()
        };
        let existing = existing_oidc();

        let observation = ExternalOidcObserver.observe(&ctx, &existing);
        assert!(observation.is_ok());
        assert_eq!(observation.config, existing);
        assert!(harness.recorder.events().is_empty());
        assert!(harness.syncer.rules().is_empty());
    }

    #[test]
    fn test_second_pass_is_quiet() {
        let mut p = provider();
        p.claim_mappings.username.claim = "sub".to_string();
        let harness = Harness::new(oidc(p));

        let first = harness.observe(&PathTree::new());
        assert!(first.is_ok());
        harness.recorder.clear();

        let second = harness.observe(&first.config);
        assert!(second.is_ok());
        assert_eq!(second.config, first.config);
        assert!(harness.recorder.events().is_empty());
    }

    #[test]
    fn test_structured_mode() {
        let mut p = provider();
        p.claim_validation_rules = vec![TokenClaimValidationRule {
            r#type: TokenValidationRuleType::Cel,
            cel: Some(TokenClaimValidationCelRule {
                expression: "claims.aud == 'kas'".to_string(),
                message: String::new(),
            }),
            ..Default::default()
        }];
        let lookup = oidc(p).with_config_map(config_map_with_data(
            "openshift-config-managed",
            "auth-config",
            [("auth-config.json", "{}")],
        ));
        let harness = Harness::with_gates(
            lookup,
            &[FEATURE_GATE_EXTERNAL_OIDC, FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED],
        );

        let observation = harness.observe(&existing_oidc());
        assert!(observation.is_ok(), "{:?}", observation.errors);

        let mut expected = PathTree::new();
        expected
            .set_list(
                AUTHENTICATION_CONFIG,
                ["/etc/kubernetes/static-pod-resources/configmaps/auth-config/auth-config.json"],
            )
            .unwrap();
        assert_eq!(observation.config, expected);
        assert_eq!(
            harness
                .syncer
                .rule_for(&ResourceLocation::new(TARGET_NS, "auth-config")),
            Some(ResourceLocation::new("openshift-config-managed", "auth-config"))
        );
        assert!(harness
            .recorder
            .messages()
            .contains(&EVENT_AUTH_CONFIG_SYNCED.to_string()));
    }

    #[test]
    fn test_structured_gate_without_source_uses_flags() {
        let harness = Harness::with_gates(
            oidc(provider()),
            &[FEATURE_GATE_EXTERNAL_OIDC, FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED],
        );
        let observation = harness.observe(&PathTree::new());
        assert!(observation.is_ok());
        assert!(observation.config.get(AUTHENTICATION_CONFIG).is_none());
        assert!(observation.config.get(OIDC_CLIENT_ID).is_some());
        assert_eq!(
            harness
                .syncer
                .rule_for(&ResourceLocation::new(TARGET_NS, "auth-config")),
            Some(ResourceLocation::empty())
        );
    }

    fn structured_gates() -> [&'static str; 2] {
        [FEATURE_GATE_EXTERNAL_OIDC, FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED]
    }

    #[test]
    fn test_structured_mirror_error_issues_nothing() {
        let mut p = provider();
        p.issuer.certificate_authority.name = "idp-ca".to_string();
        let lookup = oidc(p)
            .with_config_map(config_map_with_data(
                "openshift-config",
                "idp-ca",
                [("ca-bundle.crt", "cert")],
            ))
            .with_config_map(config_map_with_data(
                "openshift-config-managed",
                "auth-config",
                [("other", "a")],
            ))
            .with_config_map(config_map_with_data(TARGET_NS, "auth-config", [("other", "b")]));
        let harness = Harness::with_gates(lookup, &structured_gates());
        let existing = existing_oidc();

        let observation = harness.observe(&existing);
        assert_eq!(observation.config, existing);
        assert!(matches!(
            observation.errors.as_slice(),
            [ObserveError::ComparisonKeyMissing { key }] if key == "auth-config.json"
        ));
        assert!(harness.syncer.rules().is_empty());
        assert!(harness.recorder.events().is_empty());
    }

    #[test]
    fn test_structured_source_gone_removes_mirror() {
        let lookup = oidc(provider()).with_config_map(config_map_with_data(
            TARGET_NS,
            "auth-config",
            [("auth-config.json", "{}")],
        ));
        let harness = Harness::with_gates(lookup, &structured_gates());

        let mut existing = PathTree::new();
        existing
            .set_list(
                AUTHENTICATION_CONFIG,
                ["/etc/kubernetes/static-pod-resources/configmaps/auth-config/auth-config.json"],
            )
            .unwrap();

        let observation = harness.observe(&existing);
        assert!(observation.is_ok(), "{:?}", observation.errors);
        assert!(observation.config.get(AUTHENTICATION_CONFIG).is_none());
        assert_eq!(list(&observation.config, OIDC_CLIENT_ID), Some(vec!["abc".to_string()]));
        assert_eq!(
            harness
                .syncer
                .rule_for(&ResourceLocation::new(TARGET_NS, "auth-config")),
            Some(ResourceLocation::empty())
        );
        assert_eq!(
            harness.recorder.messages(),
            vec![EVENT_AUTH_CONFIG_REMOVED.to_string(), EVENT_CHANGED.to_string()]
        );
    }

    /// Snapshot whose lookups of one ConfigMap name fail
    struct FailingConfigMap {
        inner: ClusterSnapshot,
        name: &'static str,
    }

    impl StateLookup for FailingConfigMap {
        fn authentication(&self, name: &str) -> Result<Option<Arc<Authentication>>> {
            self.inner.authentication(name)
        }

        fn config_map(&self, namespace: &str, name: &str) -> Result<Option<Arc<ConfigMap>>> {
            if name == self.name {
                return Err(ObserveError::Lookup("cache not synced".to_string()));
            }
            self.inner.config_map(namespace, name)
        }
    }

    #[test]
    fn test_reset_issues_nothing_when_a_lookup_fails() {
        let lookup = FailingConfigMap {
            inner: ClusterSnapshot::new()
                .with_authentication(auth(AuthenticationType::IntegratedOAuth, vec![]))
                .with_config_map(config_map_with_data(
                    TARGET_NS,
                    "oidc-serving-ca-bundle",
                    [("ca-bundle.crt", "old")],
                )),
            name: "auth-config",
        };
        let harness = Harness::new(ClusterSnapshot::new());
        let ctx = ObserverContext {
            lookup: &lookup,
            ..harness.ctx()
        };
        let existing = existing_oidc();

        let observation = ExternalOidcObserver.observe(&ctx, &existing);
        assert_eq!(observation.config, existing);
        assert!(matches!(observation.errors.as_slice(), [ObserveError::Lookup(_)]));
        assert!(harness.syncer.rules().is_empty());
        assert!(harness.recorder.events().is_empty());
    }
}
