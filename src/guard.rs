//! SanitizingServer, an rmcp ServerHandler wrapper that redacts secrets from
//! every tool result before it leaves the process.
//!
//! Known values are reloaded from the environment's provider on each call, so
//! a rotated secret is covered without restarting the server. If redaction
//! cannot run, the caller gets an internal error instead of the raw result.

use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};

use crate::secrets::SecretProvider;

/// Redact a tool result with the provider's current secret values.
pub async fn guard_tool_result(
    provider: &SecretProvider,
    result: CallToolResult,
) -> crate::Result<CallToolResult> {
    provider.sanitizer().await?.sanitize(&result)
}

/// Wraps any MCP server handler; tool results pass through the sanitizer.
#[derive(Clone)]
pub struct SanitizingServer<H> {
    inner: H,
    provider: Arc<SecretProvider>,
}

impl<H: ServerHandler> SanitizingServer<H> {
    pub fn new(inner: H, provider: Arc<SecretProvider>) -> Self {
        Self { inner, provider }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: ServerHandler> ServerHandler for SanitizingServer<H> {
    fn get_info(&self) -> ServerInfo {
        self.inner.get_info()
    }

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.inner.list_tools(request, context).await
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = request.name.to_string();
        let result = self.inner.call_tool(request, context).await?;
        guard_tool_result(&self.provider, result).await.map_err(|e| {
            tracing::error!(
                tool = %tool,
                environment = %self.provider.environment(),
                error = %e,
                "Withholding tool result that could not be sanitized"
            );
            McpError::internal_error(format!("tool result withheld: {}", e), None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BerthError;
    use crate::secrets::kubernetes::SecretData;
    use crate::secrets::{EnvProvider, KubernetesProvider, SecretStore};
    use futures::future::BoxFuture;
    use rmcp::model::{Content, ErrorCode};
    use rmcp::{ServiceError, ServiceExt};
    use std::collections::BTreeMap;

    fn env_provider(pairs: &[(&str, &str)]) -> SecretProvider {
        let ambient: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SecretProvider::Env(EnvProvider::load_with("local", None, Arc::new(ambient)).unwrap())
    }

    struct UnreachableStore;

    impl SecretStore for UnreachableStore {
        fn read<'a>(
            &'a self,
            _namespace: &'a str,
            _name: &'a str,
        ) -> BoxFuture<'a, std::result::Result<Option<SecretData>, String>> {
            Box::pin(async { Err("no route to host".to_string()) })
        }
    }

    #[derive(Clone)]
    struct WeatherServer;

    impl ServerHandler for WeatherServer {
        fn get_info(&self) -> ServerInfo {
            ServerInfo {
                instructions: Some("weather lookups".into()),
                ..Default::default()
            }
        }

        async fn call_tool(
            &self,
            _request: CallToolRequestParams,
            _context: RequestContext<RoleServer>,
        ) -> Result<CallToolResult, McpError> {
            Ok(CallToolResult::success(vec![
                Content::text("called upstream with key wk-7f3a9c"),
                Content::text("sunny, 23C"),
            ]))
        }
    }

    fn unreachable_provider() -> SecretProvider {
        SecretProvider::Kubernetes(KubernetesProvider::with_store(
            "production",
            "weather-secrets",
            "prod",
            Some(5),
            Arc::new(UnreachableStore),
        ))
    }

    /// Serve the wrapped handler over an in-memory pipe and call one tool.
    async fn call_over_duplex(
        provider: SecretProvider,
    ) -> std::result::Result<CallToolResult, ServiceError> {
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        let server = SanitizingServer::new(WeatherServer, Arc::new(provider));
        let server_handle = tokio::spawn(async move {
            if let Ok(running) = server.serve(server_transport).await {
                let _ = running.waiting().await;
            }
        });

        let client = ().serve(client_transport).await.unwrap();
        let result = client
            .call_tool(CallToolRequestParams {
                meta: None,
                name: "forecast".into(),
                arguments: None,
                task: None,
            })
            .await;
        client.cancel().await.unwrap();
        let _ = server_handle.await;
        result
    }

    #[tokio::test]
    async fn test_tool_result_never_contains_secret() {
        let provider = env_provider(&[("WEATHER_API_KEY", "wk-7f3a9c")]);
        let result = CallToolResult::success(vec![
            Content::text("called upstream with key wk-7f3a9c"),
            Content::text("sunny, 23C"),
        ]);

        let guarded = guard_tool_result(&provider, result).await.unwrap();
        let json = serde_json::to_string(&guarded).unwrap();
        assert!(!json.contains("wk-7f3a9c"));
        assert!(json.contains("sunny, 23C"));
    }

    #[tokio::test]
    async fn test_default_patterns_apply_without_known_values() {
        let provider = env_provider(&[]);
        let leaked = format!("ghp_{}", "Z".repeat(36));
        let result = CallToolResult::success(vec![Content::text(format!("token {}", leaked))]);
        let guarded = guard_tool_result(&provider, result).await.unwrap();
        assert!(!serde_json::to_string(&guarded).unwrap().contains(&leaked));
    }

    #[tokio::test]
    async fn test_provider_failure_withholds_result() {
        let provider = unreachable_provider();
        let result = CallToolResult::success(vec![Content::text("anything")]);
        assert!(matches!(
            guard_tool_result(&provider, result).await,
            Err(BerthError::ProviderConnectivity(..))
        ));
    }

    #[tokio::test]
    async fn test_call_tool_over_transport_redacts_secret() {
        let provider = env_provider(&[("WEATHER_API_KEY", "wk-7f3a9c")]);
        let result = call_over_duplex(provider).await.unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("wk-7f3a9c"));
        assert!(json.contains("[REDACTED]"));
        assert!(json.contains("sunny, 23C"));
    }

    #[tokio::test]
    async fn test_call_tool_over_transport_reports_internal_error() {
        match call_over_duplex(unreachable_provider()).await {
            Err(ServiceError::McpError(e)) => {
                assert_eq!(e.code, ErrorCode::INTERNAL_ERROR);
                assert!(e.message.contains("tool result withheld"));
                assert!(!e.message.contains("wk-7f3a9c"));
            }
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[test]
    fn test_get_info_delegates() {
        let server = SanitizingServer::new(WeatherServer, Arc::new(env_provider(&[])));
        assert_eq!(
            server.get_info().instructions.as_deref(),
            Some("weather lookups")
        );
    }
}
