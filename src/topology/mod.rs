//! Topology translator: one server intent in, a consistent set of cluster
//! objects out.
//!
//! Translation is pure. The intent is validated before any object is built,
//! so a failure never yields partial output.

pub mod routing;
mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;

use crate::error::BerthError;
use crate::intent::{INTENT_API_VERSION, INTENT_KIND, ServerIntent, Transport};

pub use routing::RoutingDocument;
pub use workload::{
    INIT_CONTAINER_NAME, PROXY_CONTAINER_NAME, ROUTING_DOCUMENT_KEY, WORKLOAD_CONTAINER_NAME,
};

/// Proxy image used when none is configured.
pub const DEFAULT_PROXY_IMAGE: &str = "ghcr.io/agentgateway/agentgateway:0.7.4-musl";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "berth";

const SERVICE_PORT_NAME: &str = "http";
const SERVICE_PROTOCOL: &str = "TCP";
const SERVICE_TYPE: &str = "ClusterIP";

/// Everything rendered for one intent.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatorOutputs {
    pub deployment: Deployment,
    pub service: Service,
    /// Present only for stdio servers.
    pub config_map: Option<ConfigMap>,
}

impl TranslatorOutputs {
    /// Multi-document YAML in apply order: ConfigMap, Deployment, Service.
    pub fn to_yaml(&self) -> crate::Result<String> {
        let mut docs = Vec::with_capacity(3);
        if let Some(config_map) = &self.config_map {
            docs.push(to_yaml_doc("config map", config_map)?);
        }
        docs.push(to_yaml_doc("deployment", &self.deployment)?);
        docs.push(to_yaml_doc("service", &self.service)?);
        Ok(docs.join("---\n"))
    }
}

fn to_yaml_doc<T: Serialize>(what: &str, object: &T) -> crate::Result<String> {
    serde_yaml::to_string(object)
        .map_err(|e| BerthError::Serialization(what.to_string(), e.to_string()))
}

#[derive(Debug, Clone)]
pub struct Translator {
    proxy_image: String,
}

impl Default for Translator {
    fn default() -> Self {
        Self {
            proxy_image: DEFAULT_PROXY_IMAGE.to_string(),
        }
    }
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxy_image(mut self, image: impl Into<String>) -> Self {
        self.proxy_image = image.into();
        self
    }

    pub fn proxy_image(&self) -> &str {
        &self.proxy_image
    }

    /// Produce the Deployment, Service and (stdio only) routing ConfigMap.
    pub fn translate(&self, intent: &ServerIntent) -> crate::Result<TranslatorOutputs> {
        intent.validate()?;

        let owner = owner_reference(intent);
        let config_map = match intent.transport {
            Transport::Stdio => Some(config_map(intent, &owner)?),
            Transport::Http(_) => None,
        };
        let deployment = workload::deployment(intent, &self.proxy_image, &owner);
        let service = service(intent, &owner);

        tracing::debug!(
            server = %intent.name,
            namespace = %intent.namespace,
            transport = %intent.transport_kind(),
            secret_refs = intent.secret_refs.len(),
            "Translated server intent"
        );

        Ok(TranslatorOutputs {
            deployment,
            service,
            config_map,
        })
    }
}

/// Labels shared by the pod template and the service selector.
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_INSTANCE.to_string(), name.to_string()),
    ])
}

fn object_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(name);
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels
}

fn owner_reference(intent: &ServerIntent) -> OwnerReference {
    OwnerReference {
        api_version: INTENT_API_VERSION.to_string(),
        kind: INTENT_KIND.to_string(),
        name: intent.name.clone(),
        uid: intent.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn object_meta(intent: &ServerIntent, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(intent.name.clone()),
        namespace: Some(intent.namespace.clone()),
        labels: Some(object_labels(&intent.name)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

fn service(intent: &ServerIntent, owner: &OwnerReference) -> Service {
    let port = i32::from(intent.port);
    Service {
        metadata: object_meta(intent, owner),
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE.to_string()),
            selector: Some(selector_labels(&intent.name)),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                port,
                protocol: Some(SERVICE_PROTOCOL.to_string()),
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config_map(intent: &ServerIntent, owner: &OwnerReference) -> crate::Result<ConfigMap> {
    let document = RoutingDocument::for_intent(intent).to_yaml()?;
    Ok(ConfigMap {
        metadata: object_meta(intent, owner),
        data: Some(BTreeMap::from([(
            ROUTING_DOCUMENT_KEY.to_string(),
            document,
        )])),
        ..Default::default()
    })
}
