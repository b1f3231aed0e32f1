use json_patch::{AddOperation, Patch, PatchOperation::Add};
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::ByteString;
use kube::api::{Patch as KubePatch, PatchParams};
use kube::{Api, Client, Config};
use log::info;

use crate::constants::IGNORED_NAMESPACES;
use crate::errors::ServiceError;

pub async fn get_k8s_client() -> Result<Client, ServiceError> {
    let k8s_config = Config::infer()
        .await
        .map_err(ServiceError::from_error("Unable to infer K8S configuration"))?;
    Client::try_from(k8s_config).map_err(ServiceError::from_error("Unable to create k8s client"))
}

/// Namespaces owned by the cluster itself are never mutated.
pub fn is_mutation_applicable(namespace: &str) -> bool {
    !IGNORED_NAMESPACES.contains(&namespace)
}

/// Computes the JSON Patch that sets `ca_bundle` on the webhook entry named
/// `webhook_name`. Returns `None` when the entry already carries that bundle.
pub fn ca_bundle_patch(
    config: &MutatingWebhookConfiguration,
    webhook_name: &str,
    ca_bundle: &[u8],
) -> Result<Option<Patch>, ServiceError> {
    let config_name = config.metadata.name.as_deref().unwrap_or_default();
    let (index, webhook) = config
        .webhooks
        .as_ref()
        .and_then(|ws| ws.iter().enumerate().find(|(_, w)| w.name == webhook_name))
        .ok_or_else(|| {
            ServiceError::from_string(format!(
                "webhook entry {:?} not found in config {:?}",
                webhook_name, config_name
            ))
        })?;
    if webhook.client_config.ca_bundle.as_ref().map(|b| b.0.as_slice()) == Some(ca_bundle) {
        return Ok(None);
    }
    Ok(Some(Patch(vec![Add(AddOperation {
        path: format!("/webhooks/{}/clientConfig/caBundle", index),
        value: serde_json::to_value(ByteString(ca_bundle.to_vec()))?,
    })])))
}

/// Pushes `ca_bundle` into the MutatingWebhookConfiguration so the API server
/// trusts the certificate this webhook serves.
pub async fn push_ca_bundle(
    client: Client,
    webhook_config_name: &str,
    webhook_name: &str,
    ca_bundle: &[u8],
) -> Result<(), ServiceError> {
    let api: Api<MutatingWebhookConfiguration> = Api::all(client);
    let config = api
        .get(webhook_config_name)
        .await
        .map_err(ServiceError::from_error("Unable to get MutatingWebhookConfiguration"))?;
    match ca_bundle_patch(&config, webhook_name, ca_bundle)? {
        Some(patch) => {
            info!(
                "Patching caBundle of webhook {} in {}",
                webhook_name, webhook_config_name
            );
            api.patch(
                webhook_config_name,
                &PatchParams::default(),
                &KubePatch::Json::<()>(patch),
            )
            .await
            .map_err(ServiceError::from_error("Unable to patch MutatingWebhookConfiguration"))?;
        }
        None => {
            info!(
                "caBundle of webhook {} in {} is up to date",
                webhook_name, webhook_config_name
            );
        }
    }
    Ok(())
}
