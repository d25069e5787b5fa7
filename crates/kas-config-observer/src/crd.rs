//! Custom Resource Definitions consumed by the observers
//!
//! This module defines the cluster-scoped `Authentication` resource
//! (`authentications.config.openshift.io`). Only the fields the observers
//! translate into apiserver arguments are modelled.

use crate::error::{ObserveError, Result};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Name of the singleton Authentication resource
pub const AUTHENTICATION_RESOURCE_NAME: &str = "cluster";

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

/// Validate a Kubernetes name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed for optional references
    }
    if value.len() > 253 {
        return Err(ValidationError::new("name_too_long")
            .with_message("name exceeds 253 characters".into()));
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate a JWT claim name
fn validate_claim(value: &str) -> std::result::Result<(), ValidationError> {
    if value.contains('=') || value.contains(char::is_whitespace) {
        return Err(ValidationError::new("invalid_claim").with_message(
            format!("claim '{}' must not contain '=' or whitespace", value).into(),
        ));
    }
    Ok(())
}

/// Authentication custom resource definition
///
/// Cluster-wide authentication settings. The observers read the singleton
/// named `cluster`.
#[derive(
    CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate,
)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Authentication",
    plural = "authentications",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSpec {
    /// Identity provider type
    #[serde(default, rename = "type")]
    pub r#type: AuthenticationType,

    /// External OIDC providers (admission allows at most one)
    #[serde(default, rename = "oidcProviders")]
    #[validate(nested)]
    pub oidc_providers: Vec<OidcProvider>,
}

/// Authentication type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum AuthenticationType {
    /// Unset; behaves like `IntegratedOAuth`
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Built-in OAuth server
    IntegratedOAuth,
    /// No identity provider
    None,
    /// External OIDC provider
    #[serde(rename = "OIDC")]
    Oidc,
}

impl AuthenticationType {
    /// Whether the built-in OAuth stack handles authentication
    pub fn is_integrated_oauth(self) -> bool {
        matches!(self, AuthenticationType::Unset | AuthenticationType::IntegratedOAuth)
    }
}

impl std::fmt::Display for AuthenticationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthenticationType::Unset => "",
            AuthenticationType::IntegratedOAuth => "IntegratedOAuth",
            AuthenticationType::None => "None",
            AuthenticationType::Oidc => "OIDC",
        };
        f.write_str(s)
    }
}

/// External OIDC provider
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OidcProvider {
    /// Provider name
    #[validate(length(max = 253, message = "provider name exceeds 253 characters"))]
    pub name: String,

    /// Token issuer
    #[serde(default)]
    #[validate(nested)]
    pub issuer: TokenIssuer,

    /// Per-component OIDC clients
    #[serde(default, rename = "oidcClients")]
    #[validate(nested, length(max = 20, message = "maximum 20 OIDC clients allowed"))]
    pub oidc_clients: Vec<OidcClientConfig>,

    /// How token claims map to user attributes
    #[serde(default)]
    #[validate(nested)]
    pub claim_mappings: TokenClaimMappings,

    /// Rules tokens must satisfy
    #[serde(default)]
    #[validate(nested, length(max = 64, message = "maximum 64 claim validation rules allowed"))]
    pub claim_validation_rules: Vec<TokenClaimValidationRule>,
}

impl OidcProvider {
    /// Find the client config for a component
    pub fn client_for(
        &self,
        component_name: &str,
        component_namespace: &str,
    ) -> Option<&OidcClientConfig> {
        self.oidc_clients.iter().find(|client| {
            client.component_name == component_name
                && client.component_namespace == component_namespace
        })
    }
}

/// Token issuer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssuer {
    /// Issuer URL; must use https
    #[serde(default, rename = "issuerURL")]
    pub url: String,

    /// Accepted token audiences
    #[serde(default)]
    pub audiences: Vec<String>,

    /// ConfigMap in the config namespace holding the issuer CA bundle
    #[serde(default, rename = "issuerCertificateAuthority")]
    #[validate(nested)]
    pub certificate_authority: ConfigMapNameReference,
}

/// Reference to a ConfigMap by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Validate)]
pub struct ConfigMapNameReference {
    #[serde(default)]
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,
}

/// OIDC client for a single cluster component
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OidcClientConfig {
    #[validate(custom(function = "validate_k8s_name"))]
    pub component_name: String,

    #[validate(custom(function = "validate_k8s_name"))]
    pub component_namespace: String,

    /// Client ID registered with the provider
    #[serde(default, rename = "clientID")]
    pub client_id: String,

    #[serde(default)]
    pub extra_scopes: Vec<String>,
}

/// Username and groups claim mappings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
pub struct TokenClaimMappings {
    #[serde(default)]
    #[validate(nested)]
    pub username: UsernameClaimMapping,

    #[serde(default)]
    #[validate(nested)]
    pub groups: PrefixedClaimMapping,
}

/// Username claim mapping
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UsernameClaimMapping {
    #[serde(default)]
    #[validate(custom(function = "validate_claim"))]
    pub claim: String,

    #[serde(default)]
    pub prefix_policy: UsernamePrefixPolicy,

    /// Required when the policy is `Prefix`
    #[serde(default)]
    pub prefix: Option<UsernamePrefix>,
}

/// How usernames get prefixed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum UsernamePrefixPolicy {
    /// Leave the apiserver default in place
    #[default]
    #[serde(rename = "")]
    NoOpinion,
    /// Disable prefixing
    NoPrefix,
    /// Use `prefix.prefixString`
    Prefix,
}

/// Username prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsernamePrefix {
    pub prefix_string: String,
}

/// Claim mapping with an optional prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Validate)]
pub struct PrefixedClaimMapping {
    #[serde(default)]
    #[validate(custom(function = "validate_claim"))]
    pub claim: String,

    #[serde(default)]
    pub prefix: String,
}

/// Token validation rule type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum TokenValidationRuleType {
    #[default]
    RequiredClaim,
    #[serde(rename = "CEL")]
    Cel,
}

impl std::fmt::Display for TokenValidationRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenValidationRuleType::RequiredClaim => f.write_str("RequiredClaim"),
            TokenValidationRuleType::Cel => f.write_str("CEL"),
        }
    }
}

/// Token claim validation rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaimValidationRule {
    #[serde(default, rename = "type")]
    pub r#type: TokenValidationRuleType,

    #[serde(default)]
    #[validate(nested)]
    pub required_claim: Option<TokenRequiredClaim>,

    #[serde(default)]
    pub cel: Option<TokenClaimValidationCelRule>,
}

/// Claim that must be present with an exact value
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequiredClaim {
    #[validate(custom(function = "validate_claim"))]
    pub claim: String,

    pub required_value: String,
}

impl TokenRequiredClaim {
    /// Render as an `--oidc-required-claim` value
    pub fn to_arg(&self) -> String {
        format!("{}={}", self.claim, self.required_value)
    }
}

/// CEL validation rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaimValidationCelRule {
    pub expression: String,

    #[serde(default)]
    pub message: String,
}

/// Run boundary validation on an Authentication spec
///
/// Failures here describe state admission should already have rejected.
pub fn validate_authentication_spec(spec: &AuthenticationSpec) -> Result<()> {
    spec.validate()
        .map_err(|errors| ObserveError::SchemaViolation(errors.to_string()))
}
