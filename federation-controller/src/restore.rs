use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, ObjectMeta},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use migration_common::federation::{BindingLookup, ClusterProxy, WorkManifestRewriter};
use migration_types::{
    CapturedImage, CheckpointRequest, RestoreContainerEntry, RestoreRequest, RestoreRequestSpec,
    WorkloadBinding,
};
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::args::RestoreArgs;
use crate::error::Error;
use crate::naming::restore_request_name;

struct ContextData {
    client: Client,
    cluster_proxy: Arc<dyn ClusterProxy>,
    binding_lookup: Arc<dyn BindingLookup>,
    work_rewriter: Arc<dyn WorkManifestRewriter>,
}

/// Entrypoint for the `restore` subcommand. RO cannot watch the federation's
/// binding objects, so once leader it runs a fixed-interval poll loop instead
/// of a `kube::runtime::Controller`.
pub async fn run(client: Client, args: RestoreArgs) -> Result<(), Error> {
    println!("{}", "⚙️ starting Restore Orchestrator".green());

    let cluster_proxy = Arc::new(
        migration_common::federation::ApiServerProxyClusterProxy::try_new(
            args.federation_group.clone(),
        )
        .await?,
    );
    let context = Arc::new(ContextData {
        client: client.clone(),
        cluster_proxy,
        binding_lookup: Arc::new(migration_common::federation::CrdBindingLookup::new(client.clone())),
        work_rewriter: Arc::new(migration_common::federation::ConfigMapWorkRewriter::new(
            client.clone(),
        )),
    });

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("restore-orchestrator-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &args.namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "restore-orchestrator-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        migration_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    migration_common::signal_ready();

    let mut poll_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut renew_tick = tokio::time::interval(Duration::from_secs(5));
    let poll_interval = Duration::from_secs(args.poll_interval_secs);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = poll_task.take() {
                    task.abort();
                }
                return Ok(());
            }
            _ = renew_tick.tick() => {}
        }

        match leadership.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                if poll_task.is_none() {
                    println!("{}", "👑 acquired leadership; starting restore poll loop".green());
                    let ctx = context.clone();
                    poll_task = Some(tokio::spawn(async move {
                        let mut tick = tokio::time::interval(poll_interval);
                        loop {
                            tick.tick().await;
                            if let Err(e) = poll_once(ctx.clone()).await {
                                tracing::warn!(error = %e, "restore poll failed");
                            }
                        }
                    }));
                }
            }
            Ok(_) => {
                if let Some(task) = poll_task.take() {
                    eprintln!("lost leadership; stopping restore poll loop");
                    task.abort();
                }
            }
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = poll_task.take() {
                    task.abort();
                }
            }
        }
    }
}

async fn poll_once(ctx: Arc<ContextData>) -> Result<(), Error> {
    let specs: Api<migration_types::MigrationSpec> = Api::all(ctx.client.clone());
    for spec in specs.list(&ListParams::default()).await? {
        for source_cluster in &spec.spec.source_clusters {
            if let Err(e) = handle_source_cluster(ctx.clone(), &spec, source_cluster).await {
                tracing::warn!(
                    migration_spec = %spec.name_any(),
                    cluster = %source_cluster,
                    error = %e,
                    "restore check failed"
                );
            }
        }
    }
    Ok(())
}

async fn handle_source_cluster(
    ctx: Arc<ContextData>,
    spec: &migration_types::MigrationSpec,
    source_cluster: &str,
) -> Result<(), Error> {
    let Some(binding) = ctx.binding_lookup.get_binding(&spec.spec.workload_ref).await? else {
        return Ok(());
    };
    if !cluster_was_removed(&binding, source_cluster) {
        return Ok(());
    }

    let Some(target_cluster) = select_target_cluster(&spec.spec.source_clusters, source_cluster)
    else {
        tracing::warn!(
            migration_spec = %spec.name_any(),
            "source cluster removed but no surviving target cluster is configured"
        );
        return Ok(());
    };

    let pod_namespace = &spec.spec.workload_ref.namespace;
    let source_client = ctx.cluster_proxy.client_for(source_cluster).await?;
    let checkpoint_requests: Api<CheckpointRequest> =
        Api::namespaced(source_client, pod_namespace);
    let candidates: Vec<CheckpointRequest> = checkpoint_requests
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|cr| cr.spec.workload_ref.as_ref() == Some(&spec.spec.workload_ref))
        .filter(|cr| {
            cr.status
                .as_ref()
                .is_some_and(|s| !s.captured_images.is_empty())
        })
        .collect();

    let target_client = ctx.cluster_proxy.client_for(target_cluster).await?;
    for checkpoint_request in &candidates {
        let captured_images = &checkpoint_request.status.as_ref().unwrap().captured_images;
        ensure_restore_request(
            target_client.clone(),
            pod_namespace,
            &checkpoint_request.name_any(),
            captured_images,
        )
        .await?;

        if spec.spec.workload_ref.kind == "Pod" {
            for image in captured_images {
                ctx.work_rewriter
                    .rewrite_container_image(
                        &spec.spec.workload_ref,
                        &image.container_name,
                        &image.image_name,
                    )
                    .await?;
            }
        }
    }

    Ok(())
}

/// True when `source_cluster` no longer appears in the binding's cluster
/// list, i.e. the federation has evicted it.
pub fn cluster_was_removed(binding: &WorkloadBinding, source_cluster: &str) -> bool {
    !binding.clusters.iter().any(|c| c == source_cluster)
}

/// Picks the first configured source cluster other than the one just
/// removed, to receive the propagated RestoreRequest.
pub fn select_target_cluster<'a>(
    source_clusters: &'a [String],
    removed: &str,
) -> Option<&'a str> {
    source_clusters
        .iter()
        .find(|c| c.as_str() != removed)
        .map(String::as_str)
}

/// Pure construction of the RestoreRequest spec RO issues for a replayed
/// CheckpointRequest's captured images.
pub fn restore_request_spec(
    backup_ref: &str,
    captured_images: &[CapturedImage],
) -> RestoreRequestSpec {
    RestoreRequestSpec {
        backup_ref: backup_ref.to_string(),
        pod_ref: None,
        pod_generate_name_prefix: None,
        containers: captured_images
            .iter()
            .map(|img| RestoreContainerEntry {
                name: img.container_name.clone(),
                image: img.image_name.clone(),
            })
            .collect(),
        default_image: None,
    }
}

async fn ensure_restore_request(
    client: Client,
    namespace: &str,
    backup_ref: &str,
    captured_images: &[CapturedImage],
) -> Result<(), Error> {
    let name = restore_request_name(backup_ref);
    let api: Api<RestoreRequest> = Api::namespaced(client, namespace);
    if api.get_opt(&name).await?.is_some() {
        return Ok(());
    }

    let request = RestoreRequest {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: restore_request_spec(backup_ref, captured_images),
        status: None,
    };
    api.create(&Default::default(), &request).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(clusters: &[&str]) -> WorkloadBinding {
        WorkloadBinding {
            workload_ref: Default::default(),
            clusters: clusters.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn still_bound_cluster_is_not_removed() {
        assert!(!cluster_was_removed(&binding(&["c1", "c2"]), "c1"));
    }

    #[test]
    fn absent_cluster_is_removed() {
        assert!(cluster_was_removed(&binding(&["c2"]), "c1"));
    }

    #[test]
    fn target_cluster_skips_the_removed_one() {
        let clusters = vec!["c1".to_string(), "c2".to_string()];
        assert_eq!(select_target_cluster(&clusters, "c1"), Some("c2"));
    }

    #[test]
    fn no_target_when_only_removed_cluster_configured() {
        let clusters = vec!["c1".to_string()];
        assert_eq!(select_target_cluster(&clusters, "c1"), None);
    }

    #[test]
    fn restore_spec_carries_captured_images() {
        let images = vec![CapturedImage {
            container_name: "web".to_string(),
            image_name: "reg.example/ckpt/web:abc".to_string(),
            build_time: Default::default(),
            pushed: true,
        }];
        let spec = restore_request_spec("cr-abc", &images);
        assert_eq!(spec.backup_ref, "cr-abc");
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].image, "reg.example/ckpt/web:abc");
    }
}
