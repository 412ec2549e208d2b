//! Per-environment secret resolution behind one contract, plus redaction of
//! resolved values from tool results.

pub mod env;
pub mod kubernetes;
pub mod sanitizer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use env::{EnvLookup, EnvProvider, MIN_AMBIENT_REDACTION_LEN, ProcessEnv};
pub use kubernetes::{KubeSecretStore, KubernetesProvider, SecretStore};
pub use sanitizer::{REDACTION_MARKER, SENSITIVE_FIELD_NAMES, Sanitizer, is_sensitive_field};

const OPAQUE_SECRET_TYPE: &str = "Opaque";

/// Where an environment's secrets live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SecretProviderConfig {
    Env {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<PathBuf>,
    },
    Kubernetes {
        secret_name: String,
        namespace: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

impl SecretProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SecretProviderConfig::Env { .. } => "env",
            SecretProviderConfig::Kubernetes { .. } => "kubernetes",
        }
    }
}

/// A connected provider for one environment.
#[derive(Debug)]
pub enum SecretProvider {
    Env(EnvProvider),
    Kubernetes(KubernetesProvider),
}

impl SecretProvider {
    /// Initialize the provider an environment's config names. A relative
    /// dotenv `source` resolves against `base_dir`.
    pub async fn from_config(
        environment: &str,
        config: &SecretProviderConfig,
        base_dir: &Path,
    ) -> crate::Result<Self> {
        tracing::debug!(
            environment = %environment,
            provider = config.kind(),
            "Initializing secret provider"
        );
        match config {
            SecretProviderConfig::Env { source } => {
                let source = source.as_ref().map(|s| base_dir.join(s));
                Ok(SecretProvider::Env(EnvProvider::load(
                    environment,
                    source.as_deref(),
                )?))
            }
            SecretProviderConfig::Kubernetes {
                secret_name,
                namespace,
                timeout_secs,
            } => Ok(SecretProvider::Kubernetes(
                KubernetesProvider::connect(environment, secret_name, namespace, *timeout_secs)
                    .await?,
            )),
        }
    }

    pub fn environment(&self) -> &str {
        match self {
            SecretProvider::Env(p) => p.environment(),
            SecretProvider::Kubernetes(p) => p.environment(),
        }
    }

    pub async fn get(&self, key: &str) -> crate::Result<String> {
        match self {
            SecretProvider::Env(p) => p.get(key),
            SecretProvider::Kubernetes(p) => p.get(key).await,
        }
    }

    pub async fn get_all(&self) -> crate::Result<BTreeMap<String, String>> {
        match self {
            SecretProvider::Env(p) => Ok(p.get_all()),
            SecretProvider::Kubernetes(p) => p.get_all().await,
        }
    }

    pub async fn set(&mut self, key: &str, value: &str) -> crate::Result<()> {
        match self {
            SecretProvider::Env(p) => {
                p.set(key, value);
                Ok(())
            }
            SecretProvider::Kubernetes(p) => p.set(key, value),
        }
    }

    /// Any failure, connectivity included, reads as absent.
    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_ok()
    }

    pub async fn list_keys(&self) -> crate::Result<Vec<String>> {
        Ok(self.get_all().await?.into_keys().collect())
    }

    /// Sanitizer loaded with the values this provider currently resolves.
    /// Short ambient process variables are left out of the env provider's set.
    pub async fn sanitizer(&self) -> crate::Result<Sanitizer> {
        let values = match self {
            SecretProvider::Env(p) => p.redaction_values(),
            SecretProvider::Kubernetes(p) => p.get_all().await?.into_values().collect(),
        };
        Ok(Sanitizer::with_known_values(values))
    }

    /// Redacted copy of `data`. Fails if the known values cannot be loaded.
    pub async fn sanitize(&self, data: &Value) -> crate::Result<Value> {
        Ok(self.sanitizer().await?.sanitize_value(data))
    }
}

/// Opaque Secret carrying `values` as raw bytes.
pub fn secret_manifest(name: &str, namespace: &str, values: &BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(OPAQUE_SECRET_TYPE.to_string()),
        data: Some(
            values
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn env_provider(pairs: &[(&str, &str)]) -> SecretProvider {
        let ambient: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SecretProvider::Env(EnvProvider::load_with("local", None, Arc::new(ambient)).unwrap())
    }

    #[test]
    fn test_provider_config_from_toml() {
        let env: SecretProviderConfig =
            toml::from_str("provider = \"env\"\nsource = \".env.local\"").unwrap();
        assert_eq!(
            env,
            SecretProviderConfig::Env {
                source: Some(PathBuf::from(".env.local"))
            }
        );

        let kube: SecretProviderConfig = toml::from_str(
            "provider = \"kubernetes\"\nsecret_name = \"weather-secrets\"\nnamespace = \"staging\"",
        )
        .unwrap();
        assert_eq!(kube.kind(), "kubernetes");
        assert!(matches!(
            kube,
            SecretProviderConfig::Kubernetes { timeout_secs: None, .. }
        ));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result: Result<SecretProviderConfig, _> = toml::from_str("provider = \"vault\"");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_contract_over_env_provider() {
        let mut provider = env_provider(&[("API_KEY", "abc123"), ("REGION", "eu-west-1")]);
        assert_eq!(provider.get("API_KEY").await.unwrap(), "abc123");
        assert!(provider.exists("REGION").await);
        assert!(!provider.exists("MISSING").await);
        assert_eq!(
            provider.list_keys().await.unwrap(),
            vec!["API_KEY".to_string(), "REGION".to_string()]
        );

        provider.set("EXTRA", "value").await.unwrap();
        assert!(provider.exists("EXTRA").await);
    }

    #[tokio::test]
    async fn test_sanitize_redacts_resolved_values() {
        let provider = env_provider(&[("OPENAI_KEY", "sk-XXXX")]);
        let out = provider
            .sanitize(&json!({ "token": "Bearer sk-XXXX", "note": "fine" }))
            .await
            .unwrap();
        assert!(!out.to_string().contains("sk-XXXX"));
        assert_eq!(out["note"], "fine");
    }

    #[tokio::test]
    async fn test_short_file_secret_redacted_short_ambient_flag_kept() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(".env.local");
        std::fs::write(&source, "PIN=k9z\n").unwrap();
        let ambient = BTreeMap::from([("VERBOSE".to_string(), "on".to_string())]);
        let provider = SecretProvider::Env(
            EnvProvider::load_with("local", Some(source.as_path()), Arc::new(ambient)).unwrap(),
        );
        let out = provider
            .sanitize(&json!({ "pin": "pin k9z", "mode": "on" }))
            .await
            .unwrap();
        assert_eq!(out, json!({ "pin": "[REDACTED]", "mode": "on" }));
    }

    #[test]
    fn test_secret_manifest_shape() {
        let values = BTreeMap::from([("A".to_string(), "1".to_string())]);
        let secret = secret_manifest("weather-secrets", "prod", &values);
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(secret.data.unwrap()["A"].0, b"1".to_vec());
    }
}
