//! Berth: MCP server deployment toolkit.
//! Translates a server intent into Kubernetes objects that front a stdio or
//! HTTP MCP process with an embedded proxy, resolves per-environment secrets,
//! and redacts those secrets from tool results.

pub mod error;
pub mod guard;
pub mod intent;
pub mod manifest;
pub mod secrets;
pub mod topology;

pub use error::{BerthError, Result};
pub use guard::{SanitizingServer, guard_tool_result};
pub use intent::{
    CelAuthorization, HttpTransport, JwtAuthentication, SecretKeySelector, SecretRef,
    ServerAuthentication, ServerAuthorization, ServerIntent, ServerIntentSpec, Transport,
    TransportKind,
};
pub use manifest::{BerthManifest, DeployConfig, DeployOverrides};
pub use secrets::{
    EnvLookup, EnvProvider, KubernetesProvider, Sanitizer, SecretProvider, SecretProviderConfig,
    secret_manifest,
};
pub use topology::{RoutingDocument, Translator, TranslatorOutputs};
