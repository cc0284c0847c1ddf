//! The narrow surface this system needs from the surrounding federation
//! control plane. Everything else about the federation runtime — cluster
//! registry, work distribution, certificate issuance — is out of scope; a
//! deployment wires a concrete implementation of these two traits in.

use async_trait::async_trait;
use kube::Client;
use migration_types::{WorkloadBinding, WorkloadRef};

use crate::Error;

/// Resolves a named member cluster to a [`kube::Client`] whose requests are
/// tunneled into that cluster. The backup and restore orchestrators never
/// address a member cluster's API server directly; they go through this.
#[async_trait]
pub trait ClusterProxy: Send + Sync {
    async fn client_for(&self, cluster: &str) -> Result<Client, Error>;
}

/// Looks up the federation's current cluster binding for a workload. Returns
/// `None` when no binding has been established yet (e.g. the workload was
/// just created and federation scheduling hasn't run).
#[async_trait]
pub trait BindingLookup: Send + Sync {
    async fn get_binding(
        &self,
        workload_ref: &migration_types::WorkloadRef,
    ) -> Result<Option<WorkloadBinding>, Error>;
}

/// Rewrites the federated work object backing a `Pod`-kind workload so that
/// replacement pods boot from a captured image. Only `Pod`-kind workloads are
/// rewritten this way (§4.3 step 5); every other kind is handled by the
/// admission interceptor instead.
#[async_trait]
pub trait WorkManifestRewriter: Send + Sync {
    async fn rewrite_container_image(
        &self,
        workload_ref: &WorkloadRef,
        container_name: &str,
        image: &str,
    ) -> Result<(), Error>;
}

/// Default [`ClusterProxy`] for federation planes that aggregate member
/// clusters as API-server proxy subresources, i.e.
/// `/apis/federation.example.io/v1/clusters/{cluster}/proxy/...`. Built by
/// pointing a `kube::Client` at that base path with the cluster name
/// substituted in; every subsequent request made through the returned client
/// is transparently forwarded by the federation's apiserver aggregation
/// layer.
pub struct ApiServerProxyClusterProxy {
    base_config: kube::Config,
    group: String,
}

impl ApiServerProxyClusterProxy {
    /// Infers the control plane's own kubeconfig once and keeps it as the
    /// template every per-cluster client is derived from (same auth/TLS,
    /// different `cluster_url`).
    pub async fn try_new(group: String) -> Result<Self, Error> {
        let base_config = kube::Config::infer()
            .await
            .map_err(|e| Error::Precondition(format!("failed to infer kube config: {e}")))?;
        Ok(Self { base_config, group })
    }
}

#[async_trait]
impl ClusterProxy for ApiServerProxyClusterProxy {
    async fn client_for(&self, cluster: &str) -> Result<Client, Error> {
        let base_path = format!("/apis/{}/v1/clusters/{}/proxy", self.group, cluster);
        let proxied_url = format!("{}{}", self.base_config.cluster_url, base_path);

        let mut config = self.base_config.clone();
        config.cluster_url = proxied_url
            .parse()
            .map_err(|e| Error::Precondition(format!("invalid proxy URL '{proxied_url}': {e}")))?;

        tracing::debug!(cluster, %config.cluster_url, "resolving cluster proxy client");
        Client::try_from(config).map_err(Error::from)
    }
}

/// CRD-backed [`BindingLookup`]: bindings live as a namespaced custom
/// resource in the federation control plane, one per workload.
pub struct CrdBindingLookup {
    client: Client,
}

impl CrdBindingLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BindingLookup for CrdBindingLookup {
    async fn get_binding(
        &self,
        workload_ref: &migration_types::WorkloadRef,
    ) -> Result<Option<WorkloadBinding>, Error> {
        use k8s_openapi::api::core::v1::ConfigMap;
        use kube::Api;

        // Bindings are looked up by the workload's stable name inside a
        // well-known ConfigMap-backed index in the federation namespace;
        // deployments backed by a real binding CRD swap this lookup for a
        // typed `Api<WorkloadBinding>` get. Kept ConfigMap-based here so the
        // trait has one concrete, dependency-free default.
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), "federation-system");
        let name = format!(
            "binding-{}-{}-{}",
            workload_ref.kind.to_lowercase(),
            workload_ref.namespace,
            workload_ref.name
        );
        match api.get_opt(&name).await? {
            None => Ok(None),
            Some(cm) => {
                let clusters = cm
                    .data
                    .as_ref()
                    .and_then(|d| d.get("clusters"))
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default();
                Ok(Some(WorkloadBinding {
                    workload_ref: workload_ref.clone(),
                    clusters,
                }))
            }
        }
    }
}

/// The well-known ConfigMap data key [`ConfigMapWorkRewriter`] stores the
/// federated pod manifest under, as a YAML blob.
const MANIFEST_KEY: &str = "manifest.yaml";

/// ConfigMap-backed [`WorkManifestRewriter`]: the federated pod manifest is
/// stored as a YAML blob under [`MANIFEST_KEY`], one ConfigMap per workload,
/// mirroring [`CrdBindingLookup`]'s index shape. Deployments backed by a real
/// federation work-object type swap this for a typed patch against it.
pub struct ConfigMapWorkRewriter {
    client: Client,
}

impl ConfigMapWorkRewriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkManifestRewriter for ConfigMapWorkRewriter {
    async fn rewrite_container_image(
        &self,
        workload_ref: &WorkloadRef,
        container_name: &str,
        image: &str,
    ) -> Result<(), Error> {
        use k8s_openapi::api::core::v1::ConfigMap;
        use kube::Api;
        use kube::api::{Patch, PatchParams};

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), "federation-system");
        let name = format!(
            "work-{}-{}-{}",
            workload_ref.kind.to_lowercase(),
            workload_ref.namespace,
            workload_ref.name
        );
        let Some(cm) = api.get_opt(&name).await? else {
            return Err(Error::Precondition(format!(
                "no federated work object found for {}/{}",
                workload_ref.namespace, workload_ref.name
            )));
        };
        let mut data = cm.data.unwrap_or_default();
        let Some(manifest_blob) = data.get(MANIFEST_KEY) else {
            return Err(Error::Precondition(format!(
                "federated work object {name} has no '{MANIFEST_KEY}' key"
            )));
        };
        let rewritten = rewrite_manifest_image(manifest_blob, container_name, image)?;
        data.insert(MANIFEST_KEY.to_string(), rewritten);

        let patch = serde_json::json!({ "data": data });
        api.patch(
            &name,
            &PatchParams::apply(crate::patch::MANAGER_NAME),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Parses a pod manifest YAML blob, replaces the `image` field of the named
/// entry under `spec.containers`, and serializes the whole manifest back.
/// Errors if the manifest doesn't parse or the container isn't present,
/// rather than silently leaving the manifest untouched.
fn rewrite_manifest_image(blob: &str, container_name: &str, image: &str) -> Result<String, Error> {
    let mut manifest: serde_yaml::Value = serde_yaml::from_str(blob)
        .map_err(|e| Error::Precondition(format!("federated work manifest is not valid YAML: {e}")))?;

    let containers = manifest
        .get_mut("spec")
        .and_then(|s| s.get_mut("containers"))
        .and_then(|c| c.as_sequence_mut())
        .ok_or_else(|| {
            Error::Precondition("federated work manifest has no spec.containers".to_string())
        })?;

    let container = containers
        .iter_mut()
        .find(|c| c.get("name").and_then(|n| n.as_str()) == Some(container_name))
        .ok_or_else(|| {
            Error::Precondition(format!(
                "federated work manifest has no container named '{container_name}'"
            ))
        })?;

    container["image"] = serde_yaml::Value::String(image.to_string());

    serde_yaml::to_string(&manifest)
        .map_err(|e| Error::Precondition(format!("failed to serialize rewritten manifest: {e}")))
}

#[cfg(test)]
mod manifest_tests {
    use super::*;

    #[test]
    fn replaces_only_the_named_container_image() {
        let blob = "spec:\n  containers:\n  - name: web\n    image: old/web:1\n  - name: sidecar\n    image: old/sidecar:1\n";
        let rewritten = rewrite_manifest_image(blob, "web", "new/web:2").unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rewritten).unwrap();
        let containers = parsed["spec"]["containers"].as_sequence().unwrap();
        assert_eq!(containers[0]["image"].as_str(), Some("new/web:2"));
        assert_eq!(containers[1]["image"].as_str(), Some("old/sidecar:1"));
    }

    #[test]
    fn errors_when_container_is_absent() {
        let blob = "spec:\n  containers:\n  - name: web\n    image: old/web:1\n";
        let result = rewrite_manifest_image(blob, "missing", "new/web:2");
        assert!(result.is_err());
    }

    #[test]
    fn errors_on_malformed_yaml() {
        let result = rewrite_manifest_image("not: [valid", "web", "new/web:2");
        assert!(result.is_err());
    }
}
