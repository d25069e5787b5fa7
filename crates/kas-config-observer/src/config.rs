//! Observer configuration
//!
//! Namespaces, resource names, static file paths and gate names the
//! observers work with. Defaults match a stock cluster layout; a YAML file
//! can override any field.

use crate::error::{ObserveError, Result};
use crate::feature_gates::{FEATURE_GATE_EXTERNAL_OIDC, FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Default namespace of the managed workload
pub const DEFAULT_TARGET_NAMESPACE: &str = "openshift-kube-apiserver";

/// Default namespace holding user-provided configuration
pub const DEFAULT_CONFIG_NAMESPACE: &str = "openshift-config";

/// Default namespace holding operator-generated configuration
pub const DEFAULT_MANAGED_CONFIG_NAMESPACE: &str = "openshift-config-managed";

/// A ConfigMap mirrored into the target namespace and mounted as a static file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MirroredFile {
    /// Target ConfigMap name in the workload namespace
    #[validate(length(min = 1, message = "configMap must not be empty"))]
    pub config_map: String,

    /// Data key compared and mounted
    #[validate(length(min = 1, message = "key must not be empty"))]
    pub key: String,

    /// Path the key is mounted at inside the workload
    #[validate(length(min = 1, message = "path must not be empty"))]
    pub path: String,
}

impl MirroredFile {
    fn static_pod_resource(config_map: &str, key: &str) -> Self {
        Self {
            config_map: config_map.to_string(),
            key: key.to_string(),
            path: format!(
                "/etc/kubernetes/static-pod-resources/configmaps/{}/{}",
                config_map, key
            ),
        }
    }
}

/// Configuration shared by all observers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ObserverConfig {
    /// Namespace of the managed workload; mirror targets live here
    #[validate(length(min = 1, message = "targetNamespace must not be empty"))]
    pub target_namespace: String,

    /// Namespace of user-provided ConfigMaps (e.g. the issuer CA)
    #[validate(length(min = 1, message = "configNamespace must not be empty"))]
    pub config_namespace: String,

    /// Namespace of operator-generated ConfigMaps (e.g. structured auth config)
    #[validate(length(min = 1, message = "managedConfigNamespace must not be empty"))]
    pub managed_config_namespace: String,

    /// Component name used to select the OIDC client config
    #[validate(length(min = 1, message = "componentName must not be empty"))]
    pub component_name: String,

    /// Mirrored OIDC issuer CA bundle
    #[validate(nested)]
    pub ca_bundle: MirroredFile,

    /// Mirrored structured authentication config
    #[validate(nested)]
    pub auth_config: MirroredFile,

    /// Name of the structured auth config source in the managed namespace
    #[validate(length(min = 1, message = "authConfigSource must not be empty"))]
    pub auth_config_source: String,

    /// Gate enabling the External OIDC observer
    pub external_oidc_gate: String,

    /// Gate enabling structured authentication-config mode
    pub structured_auth_gate: String,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            target_namespace: DEFAULT_TARGET_NAMESPACE.to_string(),
            config_namespace: DEFAULT_CONFIG_NAMESPACE.to_string(),
            managed_config_namespace: DEFAULT_MANAGED_CONFIG_NAMESPACE.to_string(),
            component_name: "kube-apiserver".to_string(),
            ca_bundle: MirroredFile::static_pod_resource("oidc-serving-ca-bundle", "ca-bundle.crt"),
            auth_config: MirroredFile::static_pod_resource("auth-config", "auth-config.json"),
            auth_config_source: "auth-config".to_string(),
            external_oidc_gate: FEATURE_GATE_EXTERNAL_OIDC.to_string(),
            structured_auth_gate: FEATURE_GATE_EXTERNAL_OIDC_STRUCTURED.to_string(),
        }
    }
}

impl ObserverConfig {
    /// Parse and validate a YAML config; missing fields take defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ObserverConfig = serde_yaml::from_str(yaml)?;
        config
            .validate()
            .map_err(|errors| ObserveError::InvalidConfig(errors.to_string()))?;
        Ok(config)
    }

    /// Load and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
}
