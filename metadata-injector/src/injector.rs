use std::collections::HashSet;

use json_patch::PatchOperation::Add;
use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector, Pod};
use kube::core::admission::AdmissionRequest;
use log::{debug, info};
use metadata_common::constants::{
    CLUSTER_NAME_ENV, CONTAINER_IMAGE_NAME_ENV, CONTAINER_NAME_ENV, DEPLOYMENT_NAME_ENV,
    NAMESPACE_NAME_ENV, NODE_NAME_ENV, POD_NAME_ENV,
};
use metadata_common::kubernetes::is_mutation_applicable;

use crate::errors::AdmissionError;

const REPLICA_SET_KIND: &str = "ReplicaSet";

macro_rules! env_var {
    (value :: $env_name:expr => $value:expr) => {{
        let mut env: EnvVar = Default::default();
        env.name = $env_name.to_string();
        env.value = Some($value);
        env
    }};

    (fieldRef :: $env_name:expr => $field_path:expr) => {{
        let mut env: EnvVar = Default::default();
        env.name = $env_name.to_string();
        let mut env_source: EnvVarSource = Default::default();
        env_source.field_ref = Some(ObjectFieldSelector {
            field_path: $field_path.to_string(),
            api_version: None,
        });
        env.value_from = Some(env_source);
        env
    }};
}

/// Identity of the cluster this webhook runs in. Fixed for the process
/// lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEnvironment {
    pub cluster_name: String,
}

impl ClusterEnvironment {
    pub fn new(cluster_name: &str) -> Self {
        ClusterEnvironment {
            cluster_name: cluster_name.to_string(),
        }
    }

    /// Candidate variables for one container, in injection order.
    pub fn variables(&self, pod: &Pod, container: &Container) -> Vec<EnvVar> {
        let mut envs: Vec<EnvVar> = vec![
            env_var!(value :: CLUSTER_NAME_ENV => self.cluster_name.clone()),
            env_var!(fieldRef :: NODE_NAME_ENV => "spec.nodeName"),
            env_var!(fieldRef :: NAMESPACE_NAME_ENV => "metadata.namespace"),
            env_var!(fieldRef :: POD_NAME_ENV => "metadata.name"),
            env_var!(value :: CONTAINER_NAME_ENV => container.name.clone()),
            env_var!(value :: CONTAINER_IMAGE_NAME_ENV => container.image.clone().unwrap_or_default()),
        ];
        if let Some(deployment) = deployment_name(pod) {
            envs.push(env_var!(value :: DEPLOYMENT_NAME_ENV => deployment));
        }
        envs
    }
}

/// Best effort guess of the owning Deployment: a Pod owned by a single
/// ReplicaSet is named `<deployment>-<rs hash>-<pod suffix>`. A ReplicaSet
/// created by hand with a hyphenated name gives a wrong answer.
pub fn deployment_name(pod: &Pod) -> Option<String> {
    let owners = pod.metadata.owner_references.as_deref().unwrap_or_default();
    if owners.len() != 1 || owners[0].kind != REPLICA_SET_KIND {
        return None;
    }
    let generate_name = pod.metadata.generate_name.as_deref().unwrap_or_default();
    let parts: Vec<&str> = generate_name.split('-').collect();
    (parts.len() >= 3).then(|| parts[..parts.len() - 2].join("-"))
}

/// Add operations for the variables the container does not define yet.
/// The first one creates the `env` array when the container has none.
pub fn patch_container(
    index: usize,
    container: &Container,
    variables: Vec<EnvVar>,
) -> Result<Vec<PatchOperation>, serde_json::Error> {
    let existing: HashSet<&str> = container
        .env
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|e| e.name.as_str())
        .collect();
    let base_path = format!("/spec/containers/{}/env", index);
    let mut first = existing.is_empty();
    let mut patches = vec![];
    for env in variables
        .into_iter()
        .filter(|e| !existing.contains(e.name.as_str()))
    {
        if first {
            first = false;
            patches.push(Add(AddOperation {
                path: base_path.clone(),
                value: serde_json::to_value(vec![env])?,
            }));
        } else {
            patches.push(Add(AddOperation {
                path: format!("{}/-", base_path),
                value: serde_json::to_value(env)?,
            }));
        }
    }
    Ok(patches)
}

pub trait Patched {
    fn patch(&self, environment: &ClusterEnvironment) -> Result<Patch, serde_json::Error>;
}

impl Patched for Pod {
    fn patch(&self, environment: &ClusterEnvironment) -> Result<Patch, serde_json::Error> {
        let mut patches = vec![];
        if let Some(spec) = &self.spec {
            for (i, c) in spec.containers.iter().enumerate() {
                patches.extend(patch_container(i, c, environment.variables(self, c))?);
            }
        }
        Ok(Patch(patches))
    }
}

/// Namespace the Pod lives in. On CREATE the Pod often has no namespace yet
/// and only the admission request carries it.
fn pod_namespace<'a>(pod: &'a Pod, request: &'a AdmissionRequest<Pod>) -> &'a str {
    pod.metadata
        .namespace
        .as_deref()
        .or(request.namespace.as_deref())
        .unwrap_or_default()
}

/// Computes the patch for an admission request. An empty patch means the Pod
/// is left untouched.
pub fn mutate(
    request: &AdmissionRequest<Pod>,
    environment: &ClusterEnvironment,
) -> Result<Patch, AdmissionError> {
    let pod = request
        .object
        .as_ref()
        .ok_or_else(|| AdmissionError::ObjectMissing(String::new()))?;
    let namespace = pod_namespace(pod, request);
    info!(
        "received admission review: kind={} namespace={} name={} pod={:?} uid={} operation={:?}",
        request.kind.kind,
        namespace,
        request.name,
        pod.metadata.name,
        request.uid,
        request.operation
    );
    if !is_mutation_applicable(namespace) {
        info!(
            "skipped mutation: namespace={} pod={:?} reason=policy check (special namespaces)",
            namespace, pod.metadata.name
        );
        return Ok(Patch(vec![]));
    }
    let patch = pod
        .patch(environment)
        .map_err(|e| AdmissionError::EncodeFailed(e.to_string()))?;
    debug!("Pod patches: {:?}", patch);
    Ok(patch)
}
