use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};

use crate::error::Error;

pub async fn get_pod(client: Client, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    match api.get(name).await {
        Ok(pod) => Ok(Some(pod)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// True when the pod is scheduled onto this engine's node. CE must no-op on
/// any request whose pod lives elsewhere.
pub fn pod_is_resident(pod: &Pod, node_name: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| n == node_name)
}

/// Pod-not-running is a precondition, not a failure: the pipeline skips
/// without writing status.
pub fn pod_is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

pub fn container_image<'a>(pod: &'a Pod, container_name: &str) -> Option<&'a str> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == container_name)
        .and_then(|c| c.image.as_deref())
}

pub fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};

    fn pod(node_name: Option<&str>, phase: Option<&str>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                node_name: node_name.map(str::to_string),
                containers: vec![Container {
                    name: "web".to_string(),
                    image: Some("nginx:1.25".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn resident_matches_only_this_node() {
        assert!(pod_is_resident(&pod(Some("n1"), Some("Running")), "n1"));
        assert!(!pod_is_resident(&pod(Some("n2"), Some("Running")), "n1"));
        assert!(!pod_is_resident(&pod(None, Some("Running")), "n1"));
    }

    #[test]
    fn running_requires_running_phase() {
        assert!(pod_is_running(&pod(Some("n1"), Some("Running"))));
        assert!(!pod_is_running(&pod(Some("n1"), Some("Pending"))));
        assert!(!pod_is_running(&pod(Some("n1"), None)));
    }

    #[test]
    fn resolves_container_image_by_name() {
        let p = pod(Some("n1"), Some("Running"));
        assert_eq!(container_image(&p, "web"), Some("nginx:1.25"));
        assert_eq!(container_image(&p, "missing"), None);
    }
}
