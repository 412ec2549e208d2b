//! Project manifest (`berth.toml`): deserialization, validation, and
//! building a server intent from it plus per-invocation overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BerthError;
use crate::intent::{
    DEFAULT_TARGET_PATH, HttpTransport, SecretRef, ServerAuthentication, ServerAuthorization,
    ServerIntent, Transport, TransportKind,
};
use crate::secrets::SecretProviderConfig;

/// Longest name a Kubernetes object label may carry.
const MAX_DNS_LABEL_LEN: usize = 63;

/// Top-level project manifest, parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BerthManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub deploy: DeployConfig,
    /// Secret provider per environment name (`local`, `staging`, ...).
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretProviderConfig>,
}

/// `[deploy]` defaults for the rendered workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    pub image: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// HTTP only; defaults to `port`.
    pub target_port: Option<u16>,
    /// HTTP only; defaults to `/mcp`.
    pub target_path: Option<String>,
    /// `[deploy.authn.jwt]`: JWT validation at the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn: Option<ServerAuthentication>,
    /// `[deploy.authz.cel]`: per-request authorization rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authz: Option<ServerAuthorization>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            image: None,
            namespace: default_namespace(),
            port: default_port(),
            transport: default_transport(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            target_port: None,
            target_path: None,
            authn: None,
            authz: None,
        }
    }
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_transport() -> TransportKind {
    TransportKind::Stdio
}

const PYTHON_ARGS: &[&str] = &["src/main.py"];
const NODE_ARGS: &[&str] = &["dist/index.js"];
const NO_ARGS: &[&str] = &[];

/// Project framework and the process it starts by default.
fn default_entrypoint(framework: Option<&str>) -> Option<(&'static str, &'static [&'static str])> {
    match framework? {
        "fastmcp-python" | "official-python" => Some(("python", PYTHON_ARGS)),
        "fastmcp-ts" | "official-ts" | "easymcp-ts" => Some(("node", NODE_ARGS)),
        "mcp-go" => Some(("./server", NO_ARGS)),
        _ => None,
    }
}

/// Per-invocation values that win over the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOverrides {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub image: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<TransportKind>,
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Merged over `[deploy.env]`; these win per key.
    pub env: BTreeMap<String, String>,
    pub target_port: Option<u16>,
    pub target_path: Option<String>,
    /// Environment whose secret provider supplies the secret reference.
    pub environment: Option<String>,
    pub uid: Option<String>,
}

/// Lowercase, underscores to hyphens.
pub fn dns_label(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_DNS_LABEL_LEN
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

impl BerthManifest {
    /// Parse and validate manifest text.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let manifest: BerthManifest = toml::from_str(content)
            .map_err(|e| BerthError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest, failing fast before anything is rendered.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(BerthError::InvalidManifest(
                "'name' must be non-empty".to_string(),
            ));
        }

        let deploy_name = self.deploy_name();
        if !is_dns_label(&deploy_name) {
            return Err(BerthError::InvalidManifest(format!(
                "name '{}' does not yield a valid resource name ('{}'); use lowercase letters, digits and hyphens",
                self.name, deploy_name
            )));
        }

        let deploy = &self.deploy;
        if deploy.port == 0 {
            return Err(BerthError::InvalidManifest(
                "deploy.port must be non-zero".to_string(),
            ));
        }
        if deploy.namespace.is_empty() {
            return Err(BerthError::InvalidManifest(
                "deploy.namespace must be non-empty".to_string(),
            ));
        }
        if deploy.transport != TransportKind::Http
            && (deploy.target_port.is_some() || deploy.target_path.is_some())
        {
            return Err(BerthError::InvalidManifest(
                "deploy.target_port and deploy.target_path only apply to transport = \"http\""
                    .to_string(),
            ));
        }
        if deploy.target_port == Some(0) {
            return Err(BerthError::InvalidManifest(
                "deploy.target_port must be non-zero".to_string(),
            ));
        }
        if deploy.env.keys().any(|k| k.is_empty()) {
            return Err(BerthError::InvalidManifest(
                "deploy.env keys must be non-empty".to_string(),
            ));
        }

        for (environment, provider) in &self.secrets {
            if let SecretProviderConfig::Kubernetes {
                secret_name,
                namespace,
                ..
            } = provider
            {
                if secret_name.is_empty() || namespace.is_empty() {
                    return Err(BerthError::InvalidManifest(format!(
                        "secrets.{}: kubernetes provider requires 'secret_name' and 'namespace'",
                        environment
                    )));
                }
            }
            if let SecretProviderConfig::Kubernetes {
                timeout_secs: Some(0),
                ..
            } = provider
            {
                return Err(BerthError::InvalidManifest(format!(
                    "secrets.{}: timeout_secs must be non-zero",
                    environment
                )));
            }
        }

        Ok(())
    }

    /// Resource name derived from the project name.
    pub fn deploy_name(&self) -> String {
        dns_label(&self.name)
    }

    /// `[deploy].image`, else `<name>:<version>`.
    pub fn default_image(&self) -> String {
        self.deploy
            .image
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.deploy_name(), self.version))
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    pub fn provider_config(&self, environment: &str) -> crate::Result<&SecretProviderConfig> {
        self.secrets
            .get(environment)
            .ok_or_else(|| BerthError::UnknownEnvironment(environment.to_string()))
    }

    /// Combine manifest defaults with overrides into a validated intent.
    pub fn build_intent(&self, overrides: &DeployOverrides) -> crate::Result<ServerIntent> {
        let deploy = &self.deploy;

        let name = overrides.name.clone().unwrap_or_else(|| self.deploy_name());
        let namespace = overrides
            .namespace
            .clone()
            .unwrap_or_else(|| deploy.namespace.clone());
        let image = overrides.image.clone().unwrap_or_else(|| self.default_image());
        let port = overrides.port.unwrap_or(deploy.port);
        let transport_kind = overrides.transport.unwrap_or(deploy.transport);

        let transport = match transport_kind {
            TransportKind::Stdio => {
                if overrides.target_port.is_some() || overrides.target_path.is_some() {
                    return Err(BerthError::InvalidManifest(
                        "target port and path only apply to the http transport".to_string(),
                    ));
                }
                Transport::Stdio
            }
            TransportKind::Http => Transport::Http(HttpTransport {
                target_port: overrides
                    .target_port
                    .or(deploy.target_port)
                    .unwrap_or(port),
                target_path: overrides
                    .target_path
                    .clone()
                    .or_else(|| deploy.target_path.clone())
                    .unwrap_or_else(|| DEFAULT_TARGET_PATH.to_string()),
            }),
        };

        let (command, args) = self.resolve_entrypoint(overrides);

        let mut env = deploy.env.clone();
        env.extend(overrides.env.clone());

        let secret_refs = match &overrides.environment {
            Some(environment) => match self.provider_config(environment)? {
                SecretProviderConfig::Kubernetes {
                    secret_name,
                    namespace,
                    ..
                } => vec![SecretRef::new(secret_name.clone(), namespace.clone())],
                SecretProviderConfig::Env { .. } => Vec::new(),
            },
            None => Vec::new(),
        };

        let intent = ServerIntent {
            name,
            namespace,
            uid: overrides.uid.clone().unwrap_or_default(),
            image,
            port,
            command,
            args,
            env,
            secret_refs,
            transport,
            authn: deploy.authn.clone(),
            authz: deploy.authz.clone(),
        };
        intent.validate()?;

        tracing::debug!(
            server = %intent.name,
            transport = %intent.transport_kind(),
            environment = overrides.environment.as_deref().unwrap_or("-"),
            "Built server intent from manifest"
        );
        Ok(intent)
    }

    /// Explicit command wins with its own args; a manifest command keeps the
    /// manifest args unless overridden; otherwise the framework default.
    fn resolve_entrypoint(&self, overrides: &DeployOverrides) -> (Option<String>, Vec<String>) {
        if let Some(command) = &overrides.command {
            return (Some(command.clone()), overrides.args.clone());
        }
        let pick_args = |fallback: Vec<String>| {
            if !overrides.args.is_empty() {
                overrides.args.clone()
            } else if !self.deploy.args.is_empty() {
                self.deploy.args.clone()
            } else {
                fallback
            }
        };
        if let Some(command) = &self.deploy.command {
            return (Some(command.clone()), pick_args(Vec::new()));
        }
        match default_entrypoint(self.framework.as_deref()) {
            Some((command, args)) => (
                Some(command.to_string()),
                pick_args(args.iter().map(|a| a.to_string()).collect()),
            ),
            None => (None, pick_args(Vec::new())),
        }
    }
}
