//! Server intent model: the validated description of one MCP server workload.
//!
//! `ServerIntentSpec` is the resource form (camelCase, one optional block per
//! transport) as written by users or produced by tooling. `ServerIntent` is the
//! typed form the translator consumes, with the transport modelled as a tagged
//! union so a server can never carry both parameter blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BerthError;

/// Path the proxy forwards to when an HTTP transport leaves it unset.
pub const DEFAULT_TARGET_PATH: &str = "/mcp";

/// API version of the resource that owns every generated object.
pub const INTENT_API_VERSION: &str = "berth.nimbus.dev/v1alpha1";

/// Kind of the resource that owns every generated object.
pub const INTENT_KIND: &str = "McpServer";

const SECRET_KIND: &str = "Secret";

/// Wire binding spoken by the user's MCP process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            other => Err(BerthError::InvalidManifest(format!(
                "invalid transport type: {} (must be 'stdio' or 'http')",
                other
            ))),
        }
    }
}

/// Marker block for the stdio transport; presence alone selects it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StdioTransport {}

/// Where the user's own process serves MCP over HTTP inside its container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTransport {
    #[serde(default)]
    pub target_port: u16,
    #[serde(default = "default_target_path")]
    pub target_path: String,
}

impl HttpTransport {
    pub fn new(target_port: u16) -> Self {
        Self {
            target_port,
            target_path: default_target_path(),
        }
    }
}

fn default_target_path() -> String {
    DEFAULT_TARGET_PATH.to_string()
}

/// Transport selection with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http(HttpTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio => TransportKind::Stdio,
            Transport::Http(_) => TransportKind::Http,
        }
    }
}

/// Pointer to a Secret object mounted into the workload container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretRef {
    #[serde(default = "default_secret_kind")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl SecretRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: default_secret_kind(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

fn default_secret_kind() -> String {
    SECRET_KIND.to_string()
}

/// One key inside a Secret in the deployment's namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

/// JWT validation the proxy applies before traffic reaches the MCP process.
/// The key set is read from a file mounted out of `jwks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtAuthentication {
    #[serde(default)]
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
    pub jwks: SecretKeySelector,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerAuthentication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtAuthentication>,
}

/// CEL expressions evaluated per MCP request; a request must satisfy a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CelAuthorization {
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerAuthorization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<CelAuthorization>,
}

/// Typed server intent consumed by the topology translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIntent {
    pub name: String,
    pub namespace: String,
    /// UID of the owning resource; may be empty until the applier creates it.
    pub uid: String,
    pub image: String,
    pub port: u16,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub secret_refs: Vec<SecretRef>,
    pub transport: Transport,
    pub authn: Option<ServerAuthentication>,
    pub authz: Option<ServerAuthorization>,
}

impl ServerIntent {
    /// Minimal intent with defaults for everything but identity, image and port.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        image: impl Into<String>,
        port: u16,
        transport: Transport,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: String::new(),
            image: image.into(),
            port,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            secret_refs: Vec::new(),
            transport,
            authn: None,
            authz: None,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn jwt(&self) -> Option<&JwtAuthentication> {
        self.authn.as_ref()?.jwt.as_ref()
    }

    /// Authorization rules; empty when none are configured.
    pub fn cel_rules(&self) -> &[String] {
        self.authz
            .as_ref()
            .and_then(|a| a.cel.as_ref())
            .map(|cel| cel.rules.as_slice())
            .unwrap_or_default()
    }

    /// Check every translation precondition, failing on the first missing field.
    pub fn validate(&self) -> crate::Result<()> {
        let subject = if self.name.is_empty() {
            "<unnamed>".to_string()
        } else {
            self.name.clone()
        };
        let invalid = |msg: &str| Err(BerthError::Validation(subject.clone(), msg.to_string()));

        if self.name.is_empty() {
            return invalid("name must be specified");
        }
        if self.namespace.is_empty() {
            return invalid("namespace must be specified");
        }
        if self.image.is_empty() {
            return invalid("deployment image must be specified");
        }
        if self.port == 0 {
            return invalid("deployment port must be specified");
        }
        match &self.transport {
            Transport::Stdio => {
                // Beyond image and port, stdio also needs something to spawn.
                if self.command.as_deref().is_none_or(str::is_empty) {
                    return invalid(
                        "STDIO transport requires a command: the proxy spawns it as its stdio target",
                    );
                }
            }
            Transport::Http(http) => {
                if http.target_port == 0 {
                    return invalid("HTTP transport requires a target port");
                }
            }
        }
        if self.secret_refs.iter().any(|r| r.name.is_empty()) {
            return invalid("secret references must name a secret");
        }
        // Refs are localized into one namespace, so a repeated name would
        // repeat a volume name and a mount path.
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = self.secret_refs.iter().find(|r| !seen.insert(r.name.as_str())) {
            return Err(BerthError::Validation(
                subject.clone(),
                format!("secret '{}' is referenced more than once", dup.name),
            ));
        }
        if self.env.keys().any(|k| k.is_empty()) {
            return invalid("environment variable names must be non-empty");
        }
        if let Some(jwt) = self.jwt() {
            if jwt.jwks.name.is_empty() || jwt.jwks.key.is_empty() {
                return invalid("JWT authentication requires a JWKS secret name and key");
            }
        }
        if self.cel_rules().iter().any(|rule| rule.trim().is_empty()) {
            return invalid("authorization rules must be non-empty");
        }
        Ok(())
    }

    /// Secret references rewritten into the deployment's own namespace.
    pub fn localized_secret_refs(&self) -> Vec<SecretRef> {
        self.secret_refs
            .iter()
            .map(|r| SecretRef {
                kind: SECRET_KIND.to_string(),
                name: r.name.clone(),
                namespace: self.namespace.clone(),
            })
            .collect()
    }

    /// Rewrite stored secret references into the deployment's namespace.
    pub fn localize_secret_refs(&mut self) {
        self.secret_refs = self.localized_secret_refs();
    }
}

/// Resource form of a server intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerIntentSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_kind: Option<TransportKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdio_transport: Option<StdioTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_transport: Option<HttpTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authn: Option<ServerAuthentication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authz: Option<ServerAuthorization>,
}

impl TryFrom<ServerIntentSpec> for ServerIntent {
    type Error = BerthError;

    fn try_from(spec: ServerIntentSpec) -> crate::Result<Self> {
        let invalid = |msg: String| BerthError::Validation(spec.name.clone(), msg);

        let transport = match (&spec.stdio_transport, &spec.http_transport) {
            (Some(_), None) => Transport::Stdio,
            (None, Some(http)) => {
                let mut http = http.clone();
                if http.target_path.is_empty() {
                    http.target_path = default_target_path();
                }
                Transport::Http(http)
            }
            (None, None) => {
                return Err(invalid(
                    "exactly one of stdioTransport or httpTransport must be set, found neither"
                        .to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "exactly one of stdioTransport or httpTransport must be set, found both"
                        .to_string(),
                ));
            }
        };

        if let Some(kind) = spec.transport_kind {
            if kind != transport.kind() {
                return Err(invalid(format!(
                    "transportKind '{}' does not match the populated {}Transport block",
                    kind,
                    transport.kind()
                )));
            }
        }

        Ok(ServerIntent {
            name: spec.name,
            namespace: spec.namespace,
            uid: spec.uid,
            image: spec.image,
            port: spec.port,
            command: spec.command,
            args: spec.args,
            env: spec.env,
            secret_refs: spec.secret_refs,
            transport,
            authn: spec.authn,
            authz: spec.authz,
        })
    }
}

impl From<&ServerIntent> for ServerIntentSpec {
    fn from(intent: &ServerIntent) -> Self {
        let (stdio_transport, http_transport) = match &intent.transport {
            Transport::Stdio => (Some(StdioTransport {}), None),
            Transport::Http(http) => (None, Some(http.clone())),
        };
        ServerIntentSpec {
            name: intent.name.clone(),
            namespace: intent.namespace.clone(),
            uid: intent.uid.clone(),
            image: intent.image.clone(),
            port: intent.port,
            command: intent.command.clone(),
            args: intent.args.clone(),
            env: intent.env.clone(),
            secret_refs: intent.secret_refs.clone(),
            transport_kind: Some(intent.transport_kind()),
            stdio_transport,
            http_transport,
            authn: intent.authn.clone(),
            authz: intent.authz.clone(),
        }
    }
}
