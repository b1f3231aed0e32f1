pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
pub const KUBE_PUBLIC_NAMESPACE: &str = "kube-public";
pub const IGNORED_NAMESPACES: [&str; 2] = [KUBE_SYSTEM_NAMESPACE, KUBE_PUBLIC_NAMESPACE];

pub const CLUSTER_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_CLUSTER_NAME";
pub const NODE_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_NODE_NAME";
pub const NAMESPACE_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_NAMESPACE_NAME";
pub const POD_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_POD_NAME";
pub const CONTAINER_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_CONTAINER_NAME";
pub const CONTAINER_IMAGE_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_CONTAINER_IMAGE_NAME";
pub const DEPLOYMENT_NAME_ENV: &str = "NEW_RELIC_METADATA_KUBERNETES_DEPLOYMENT_NAME";
