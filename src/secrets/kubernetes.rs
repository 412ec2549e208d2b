//! Provider backed by one named Secret object in the cluster.
//!
//! Every read goes to the API server; nothing is cached, so a failed call
//! leaves the provider usable for the next one.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};

use crate::error::BerthError;

/// Deadline for a single live read when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Raw key/byte pairs of a Secret's `data`.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Read access to Secret objects. `Ok(None)` means the object does not exist;
/// `Err` carries a transport or credential failure.
pub trait SecretStore: Send + Sync {
    fn read<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<SecretData>, String>>;
}

/// `SecretStore` over the cluster API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SecretStore for KubeSecretStore {
    fn read<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Option<SecretData>, String>> {
        Box::pin(async move {
            let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
            let secret = api.get_opt(name).await.map_err(|e| e.to_string())?;
            Ok(secret.map(|s| {
                s.data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, bytes)| (key, bytes.0))
                    .collect()
            }))
        })
    }
}

/// Kubeconfig location: first entry of `$KUBECONFIG`, else `~/.kube/config`.
pub fn kubeconfig_path(kubeconfig_var: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    kubeconfig_var
        .filter(|v| !v.is_empty())
        .and_then(|v| std::env::split_paths(&v).next())
        .or_else(|| home.map(|h| h.join(".kube").join("config")))
}

/// Build a client from in-cluster credentials, falling back to kubeconfig.
pub async fn cluster_client(environment: &str) -> crate::Result<Client> {
    let connectivity = |detail: String| BerthError::ProviderConnectivity(environment.to_string(), detail);

    let config = match kube::Config::incluster() {
        Ok(config) => config,
        Err(in_cluster) => {
            tracing::debug!(
                environment = %environment,
                reason = %in_cluster,
                "No in-cluster credentials, falling back to kubeconfig"
            );
            let path = kubeconfig_path(std::env::var_os("KUBECONFIG"), dirs::home_dir())
                .ok_or_else(|| connectivity("cannot locate a kubeconfig file".to_string()))?;
            let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                connectivity(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| connectivity(format!("invalid kubeconfig {}: {}", path.display(), e)))?
        }
    };

    Client::try_from(config).map_err(|e| connectivity(format!("failed to create client: {}", e)))
}

pub struct KubernetesProvider {
    environment: String,
    secret_name: String,
    namespace: String,
    timeout: Duration,
    store: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for KubernetesProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesProvider")
            .field("environment", &self.environment)
            .field("secret", &self.object_ref())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl KubernetesProvider {
    /// Connect to the cluster once; the client is reused for every read.
    pub async fn connect(
        environment: &str,
        secret_name: &str,
        namespace: &str,
        timeout_secs: Option<u64>,
    ) -> crate::Result<Self> {
        let client = cluster_client(environment).await?;
        Ok(Self::with_store(
            environment,
            secret_name,
            namespace,
            timeout_secs,
            Arc::new(KubeSecretStore::new(client)),
        ))
    }

    pub fn with_store(
        environment: &str,
        secret_name: &str,
        namespace: &str,
        timeout_secs: Option<u64>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            environment: environment.to_string(),
            secret_name: secret_name.to_string(),
            namespace: namespace.to_string(),
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            store,
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn object_ref(&self) -> String {
        format!("{}/{}", self.namespace, self.secret_name)
    }

    /// Fresh read of the whole Secret.
    pub async fn get_all(&self) -> crate::Result<BTreeMap<String, String>> {
        let read = self.store.read(&self.namespace, &self.secret_name);
        let data = match tokio::time::timeout(self.timeout, read).await {
            Err(_) => {
                return Err(BerthError::ProviderConnectivity(
                    self.environment.clone(),
                    format!(
                        "timed out after {}s reading secret {}",
                        self.timeout.as_secs(),
                        self.object_ref()
                    ),
                ));
            }
            Ok(Err(detail)) => {
                tracing::warn!(
                    environment = %self.environment,
                    secret = %self.object_ref(),
                    error = %detail,
                    "Secret read failed"
                );
                return Err(BerthError::ProviderConnectivity(
                    self.environment.clone(),
                    format!("failed to read secret {}: {}", self.object_ref(), detail),
                ));
            }
            Ok(Ok(None)) => {
                return Err(BerthError::SecretObjectNotFound(
                    self.environment.clone(),
                    self.object_ref(),
                ));
            }
            Ok(Ok(Some(data))) => data,
        };

        data.into_iter()
            .map(|(key, bytes)| {
                String::from_utf8(bytes)
                    .map(|value| (key.clone(), value))
                    .map_err(|_| {
                        BerthError::Serialization(
                            format!("secret {} key '{}'", self.object_ref(), key),
                            "value is not valid UTF-8".to_string(),
                        )
                    })
            })
            .collect()
    }

    pub async fn get(&self, key: &str) -> crate::Result<String> {
        self.get_all()
            .await?
            .remove(key)
            .ok_or_else(|| BerthError::SecretNotFound(self.environment.clone(), key.to_string()))
    }

    /// Cluster Secrets are changed through cluster tooling, never from here.
    pub fn set(&self, _key: &str, _value: &str) -> crate::Result<()> {
        Err(BerthError::Unsupported(
            self.environment.clone(),
            "set".to_string(),
            format!(
                "update secret {} with kubectl or the Kubernetes API",
                self.object_ref()
            ),
        ))
    }
}
