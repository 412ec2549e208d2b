//! Deployment synthesis for the two container topologies.
//!
//! - stdio: an init container copies the proxy binary into a shared volume;
//!   the main container runs the proxy, which spawns the user's process.
//! - http: the user's process runs unmodified; the proxy runs as a sidecar
//!   forwarding to it over the pod's loopback.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, PodSpec,
    PodTemplateSpec, SeccompProfile, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use crate::intent::{ServerIntent, Transport};

use super::routing::JWKS_MOUNT_DIR;
use super::{object_meta, selector_labels};

/// Proxy binary location inside the proxy image.
const PROXY_BINARY_IN_IMAGE: &str = "/usr/bin/agentgateway";
/// Shared volume the init container copies the proxy binary into.
const PROXY_BINARY_DIR: &str = "/agentbin";
const PROXY_BINARY_NAME: &str = "agentgateway";
const PROXY_CONFIG_DIR: &str = "/config";
/// ConfigMap key holding the routing document.
pub const ROUTING_DOCUMENT_KEY: &str = "local.yaml";
const SECRETS_MOUNT_ROOT: &str = "/secrets";

const BINARY_VOLUME: &str = "binary";
const CONFIG_VOLUME: &str = "config";
const JWKS_VOLUME: &str = "jwks";

pub const INIT_CONTAINER_NAME: &str = "copy-binary";
pub const WORKLOAD_CONTAINER_NAME: &str = "mcp-server";
pub const PROXY_CONTAINER_NAME: &str = "mcp-proxy";

const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";
const NON_ROOT_ID: i64 = 1000;

pub(super) fn deployment(
    intent: &ServerIntent,
    proxy_image: &str,
    owner: &OwnerReference,
) -> Deployment {
    let (secret_volumes, secret_mounts) = secret_wiring(intent);
    let jwks = jwks_wiring(intent);
    let jwks_mount = jwks.as_ref().map(|(_, m)| m.clone());

    let mut pod = match &intent.transport {
        Transport::Stdio => stdio_pod(intent, proxy_image, secret_mounts, jwks_mount),
        Transport::Http(_) => http_pod(intent, proxy_image, secret_mounts, jwks_mount),
    };
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    volumes.extend(secret_volumes);
    volumes.extend(jwks.map(|(v, _)| v));

    Deployment {
        metadata: object_meta(intent, owner),
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(&intent.name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels(&intent.name)),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn stdio_pod(
    intent: &ServerIntent,
    proxy_image: &str,
    secret_mounts: Vec<VolumeMount>,
    jwks_mount: Option<VolumeMount>,
) -> PodSpec {
    let copy_binary = Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(proxy_image.to_string()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        command: Some(shell(format!(
            "cp {} {}/{}",
            PROXY_BINARY_IN_IMAGE, PROXY_BINARY_DIR, PROXY_BINARY_NAME
        ))),
        volume_mounts: Some(vec![mount(BINARY_VOLUME, PROXY_BINARY_DIR)]),
        security_context: Some(security_context()),
        ..Default::default()
    };

    let mut mounts = vec![
        mount(CONFIG_VOLUME, PROXY_CONFIG_DIR),
        mount(BINARY_VOLUME, PROXY_BINARY_DIR),
    ];
    mounts.extend(secret_mounts);
    mounts.extend(jwks_mount);

    // The user's command runs as the proxy's stdio target, never directly.
    let workload = Container {
        name: WORKLOAD_CONTAINER_NAME.to_string(),
        image: Some(intent.image.clone()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        command: Some(shell(proxy_invocation(&format!(
            "{}/{}",
            PROXY_BINARY_DIR, PROXY_BINARY_NAME
        )))),
        env: env_vars(&intent.env),
        volume_mounts: Some(mounts),
        security_context: Some(security_context()),
        ..Default::default()
    };

    PodSpec {
        init_containers: Some(vec![copy_binary]),
        containers: vec![workload],
        volumes: Some(vec![
            config_volume(&intent.name),
            Volume {
                name: BINARY_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn http_pod(
    intent: &ServerIntent,
    proxy_image: &str,
    secret_mounts: Vec<VolumeMount>,
    jwks_mount: Option<VolumeMount>,
) -> PodSpec {
    let mut proxy_mounts = vec![mount(CONFIG_VOLUME, PROXY_CONFIG_DIR)];
    // Only the sidecar validates tokens.
    proxy_mounts.extend(jwks_mount);

    let proxy = Container {
        name: PROXY_CONTAINER_NAME.to_string(),
        image: Some(proxy_image.to_string()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        command: Some(shell(proxy_invocation(PROXY_BINARY_IN_IMAGE))),
        volume_mounts: Some(proxy_mounts),
        security_context: Some(security_context()),
        ..Default::default()
    };

    let workload = Container {
        name: WORKLOAD_CONTAINER_NAME.to_string(),
        image: Some(intent.image.clone()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
        command: intent.command.clone().map(|cmd| vec![cmd]),
        args: (!intent.args.is_empty()).then(|| intent.args.clone()),
        env: env_vars(&intent.env),
        volume_mounts: (!secret_mounts.is_empty()).then_some(secret_mounts),
        security_context: Some(security_context()),
        ..Default::default()
    };

    // No ConfigMap is emitted for http; the volume still names one.
    PodSpec {
        containers: vec![proxy, workload],
        volumes: Some(vec![config_volume(&intent.name)]),
        ..Default::default()
    }
}

fn proxy_invocation(binary: &str) -> String {
    format!("{} -f {}/{}", binary, PROXY_CONFIG_DIR, ROUTING_DOCUMENT_KEY)
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn config_volume(config_map_name: &str) -> Volume {
    Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// One read-only secret volume per reference, resolved in the deployment's
/// own namespace.
fn secret_wiring(intent: &ServerIntent) -> (Vec<Volume>, Vec<VolumeMount>) {
    intent
        .localized_secret_refs()
        .into_iter()
        .map(|secret_ref| {
            let volume_name = format!("{}-{}", secret_ref.namespace, secret_ref.name);
            let volume = Volume {
                name: volume_name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_ref.name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let mount = VolumeMount {
                name: volume_name,
                mount_path: format!("{}/{}", SECRETS_MOUNT_ROOT, secret_ref.name),
                read_only: Some(true),
                ..Default::default()
            };
            (volume, mount)
        })
        .unzip()
}

/// Key set for JWT validation, mounted read-only where the proxy runs.
fn jwks_wiring(intent: &ServerIntent) -> Option<(Volume, VolumeMount)> {
    let jwt = intent.jwt()?;
    let volume = Volume {
        name: JWKS_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(jwt.jwks.name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: JWKS_VOLUME.to_string(),
        mount_path: JWKS_MOUNT_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    };
    Some((volume, mount))
}

/// BTreeMap iteration keeps the list sorted by name.
fn env_vars(env: &BTreeMap<String, String>) -> Option<Vec<EnvVar>> {
    if env.is_empty() {
        return None;
    }
    Some(
        env.iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect(),
    )
}

/// Restricted execution profile applied to every generated container.
pub(super) fn security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        run_as_non_root: Some(true),
        run_as_user: Some(NON_ROOT_ID),
        run_as_group: Some(NON_ROOT_ID),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
