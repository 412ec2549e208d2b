//! Routing document consumed by the embedded proxy.
//!
//! One bind on the deployment port, one HTTP listener, one route matching the
//! `/sse` and `/mcp` prefixes and forwarding everything to a single MCP target.
//! The target is a union keyed by transport kind: a `stdio` process the proxy
//! spawns itself, or an `sse` endpoint inside the pod. JWT and authorization
//! settings on the intent become policies on that route.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BerthError;
use crate::intent::{ServerIntent, Transport};

/// Path prefixes routed to the MCP backend.
pub const ROUTE_PATH_PREFIXES: [&str; 2] = ["/sse", "/mcp"];

/// Host the sidecar proxy forwards to inside the pod's network namespace.
pub const POD_LOCAL_HOST: &str = "localhost";

/// Where the JWKS secret is mounted in the proxy-running container.
pub const JWKS_MOUNT_DIR: &str = "/jwks";

const LISTENER_NAME: &str = "default";
const LISTENER_PROTOCOL: &str = "HTTP";
const ROUTE_NAME: &str = "mcp";
const BACKEND_WEIGHT: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySettings {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingDocument {
    pub config: ProxySettings,
    pub binds: Vec<Bind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bind {
    pub port: u16,
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub protocol: String,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub matches: Vec<RouteMatch>,
    pub backends: Vec<RouteBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<RoutePolicies>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePolicies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_auth: Option<JwtAuthPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_authorization: Option<McpAuthorizationPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtAuthPolicy {
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
    pub jwks: JwksSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwksSource {
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpAuthorizationPolicy {
    pub rules: Vec<String>,
}

impl RoutePolicies {
    /// Policies for an intent, or `None` when it configures neither.
    pub fn for_intent(intent: &ServerIntent) -> Option<Self> {
        let jwt_auth = intent.jwt().map(|jwt| JwtAuthPolicy {
            issuer: jwt.issuer.clone(),
            audiences: jwt.audiences.clone(),
            jwks: JwksSource {
                file: format!("{}/{}", JWKS_MOUNT_DIR, jwt.jwks.key),
            },
        });
        let rules = intent.cel_rules();
        let mcp_authorization = (!rules.is_empty()).then(|| McpAuthorizationPolicy {
            rules: rules.to_vec(),
        });

        if jwt_auth.is_none() && mcp_authorization.is_none() {
            return None;
        }
        Some(Self {
            jwt_auth,
            mcp_authorization,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteMatch {
    pub path: PathMatch,
}

/// Path predicate; one of the two fields is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
}

impl PathMatch {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: Some(prefix.into()),
            exact: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteBackend {
    pub weight: u32,
    pub mcp: McpBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpBackend {
    pub targets: Vec<McpTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpTarget {
    pub name: String,
    #[serde(flatten)]
    pub spec: TargetSpec,
}

/// Backend target; exactly one variant is populated per document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetSpec {
    Stdio(StdioTarget),
    Sse(SseTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StdioTarget {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SseTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RoutingDocument {
    /// Build the document for an intent. Callers validate the intent first.
    pub fn for_intent(intent: &ServerIntent) -> Self {
        let spec = match &intent.transport {
            Transport::Stdio => TargetSpec::Stdio(StdioTarget {
                cmd: intent.command.clone().unwrap_or_default(),
                args: intent.args.clone(),
                env: intent.env.clone(),
            }),
            Transport::Http(http) => TargetSpec::Sse(SseTarget {
                host: POD_LOCAL_HOST.to_string(),
                port: http.target_port,
                path: http.target_path.clone(),
            }),
        };

        let matches = ROUTE_PATH_PREFIXES
            .iter()
            .map(|prefix| RouteMatch {
                path: PathMatch::prefix(*prefix),
            })
            .collect();

        RoutingDocument {
            config: ProxySettings::default(),
            binds: vec![Bind {
                port: intent.port,
                listeners: vec![Listener {
                    name: LISTENER_NAME.to_string(),
                    protocol: LISTENER_PROTOCOL.to_string(),
                    routes: vec![Route {
                        name: ROUTE_NAME.to_string(),
                        matches,
                        backends: vec![RouteBackend {
                            weight: BACKEND_WEIGHT,
                            mcp: McpBackend {
                                targets: vec![McpTarget {
                                    name: intent.name.clone(),
                                    spec,
                                }],
                            },
                        }],
                        policies: RoutePolicies::for_intent(intent),
                    }],
                }],
            }],
        }
    }

    pub fn to_yaml(&self) -> crate::Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| BerthError::Serialization("routing document".to_string(), e.to_string()))
    }

    /// The single MCP target, if the document has the expected shape.
    pub fn target(&self) -> Option<&McpTarget> {
        self.binds
            .first()?
            .listeners
            .first()?
            .routes
            .first()?
            .backends
            .first()?
            .mcp
            .targets
            .first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{
        CelAuthorization, HttpTransport, JwtAuthentication, SecretKeySelector,
        ServerAuthentication, ServerAuthorization,
    };

    fn stdio_intent() -> ServerIntent {
        let mut intent = ServerIntent::new("weather", "default", "x:1", 8080, Transport::Stdio);
        intent.command = Some("python".to_string());
        intent.args = vec!["app.py".to_string()];
        intent
            .env
            .insert("LOG_LEVEL".to_string(), "debug".to_string());
        intent
    }

    #[test]
    fn test_stdio_document_embeds_process() {
        let doc = RoutingDocument::for_intent(&stdio_intent());
        let target = doc.target().unwrap();
        assert_eq!(target.name, "weather");
        match &target.spec {
            TargetSpec::Stdio(stdio) => {
                assert_eq!(stdio.cmd, "python");
                assert_eq!(stdio.args, vec!["app.py"]);
                assert_eq!(stdio.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
            }
            other => panic!("expected stdio target, got {:?}", other),
        }
    }

    #[test]
    fn test_http_document_targets_pod_local_endpoint() {
        let intent = ServerIntent::new(
            "weather",
            "default",
            "x:1",
            8080,
            Transport::Http(HttpTransport::new(3001)),
        );
        let doc = RoutingDocument::for_intent(&intent);
        assert_eq!(
            doc.target().unwrap().spec,
            TargetSpec::Sse(SseTarget {
                host: "localhost".to_string(),
                port: 3001,
                path: "/mcp".to_string(),
            })
        );
    }

    #[test]
    fn test_single_bind_listener_route_and_full_weight() {
        let doc = RoutingDocument::for_intent(&stdio_intent());
        assert_eq!(doc.binds.len(), 1);
        assert_eq!(doc.binds[0].port, 8080);
        assert_eq!(doc.binds[0].listeners.len(), 1);
        let route = &doc.binds[0].listeners[0].routes[0];
        assert_eq!(route.backends.len(), 1);
        assert_eq!(route.backends[0].weight, 100);
        let prefixes: Vec<_> = route
            .matches
            .iter()
            .filter_map(|m| m.path.path_prefix.as_deref())
            .collect();
        assert_eq!(prefixes, vec!["/sse", "/mcp"]);
    }

    #[test]
    fn test_no_policies_without_auth() {
        let doc = RoutingDocument::for_intent(&stdio_intent());
        assert!(doc.binds[0].listeners[0].routes[0].policies.is_none());
        assert!(!doc.to_yaml().unwrap().contains("policies"));
    }

    #[test]
    fn test_auth_becomes_route_policies() {
        let mut intent = stdio_intent();
        intent.authn = Some(ServerAuthentication {
            jwt: Some(JwtAuthentication {
                issuer: "https://issuer.example".to_string(),
                audiences: vec!["weather".to_string()],
                jwks: SecretKeySelector {
                    name: "weather-jwks".to_string(),
                    key: "jwks.json".to_string(),
                },
            }),
        });
        intent.authz = Some(ServerAuthorization {
            cel: Some(CelAuthorization {
                rules: vec!["mcp.tool.name == 'forecast'".to_string()],
            }),
        });

        let doc = RoutingDocument::for_intent(&intent);
        let policies = doc.binds[0].listeners[0].routes[0].policies.clone().unwrap();
        let jwt = policies.jwt_auth.unwrap();
        assert_eq!(jwt.issuer, "https://issuer.example");
        assert_eq!(jwt.audiences, vec!["weather"]);
        assert_eq!(jwt.jwks.file, "/jwks/jwks.json");
        assert_eq!(
            policies.mcp_authorization.unwrap().rules,
            vec!["mcp.tool.name == 'forecast'"]
        );

        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("jwtAuth:"));
        assert!(yaml.contains("mcpAuthorization:"));
        assert!(yaml.contains("file: /jwks/jwks.json"));
    }

    #[test]
    fn test_authorization_alone() {
        let mut intent = stdio_intent();
        intent.authz = Some(ServerAuthorization {
            cel: Some(CelAuthorization {
                rules: vec!["true".to_string()],
            }),
        });
        let policies = RoutePolicies::for_intent(&intent).unwrap();
        assert!(policies.jwt_auth.is_none());
        assert!(policies.mcp_authorization.is_some());
    }

    #[test]
    fn test_yaml_shape() {
        let yaml = RoutingDocument::for_intent(&stdio_intent()).to_yaml().unwrap();
        assert!(yaml.contains("pathPrefix: /sse"));
        assert!(yaml.contains("pathPrefix: /mcp"));
        assert!(yaml.contains("stdio:"));
        assert!(yaml.contains("cmd: python"));
        assert!(!yaml.contains("sse:"));

        let parsed: RoutingDocument = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, RoutingDocument::for_intent(&stdio_intent()));
    }
}
