use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client, ResourceExt,
    api::{DynamicObject, ListParams, ObjectMeta},
    core::GroupVersionKind,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use migration_common::federation::ClusterProxy;
use migration_types::{CheckpointRequest, CheckpointRequestSpec, MigrationSpec, PodRef, WorkloadRef};
use owo_colors::OwoColorize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::args::BackupArgs;
use crate::error::Error;
use crate::naming::checkpoint_request_name;

struct ContextData {
    client: Client,
    cluster_proxy: Arc<dyn ClusterProxy>,
}

/// Entrypoint for the `backup` subcommand: federation-plane singleton,
/// guarded by leader election since only one replica may materialize
/// CheckpointRequests at a time.
pub async fn run(client: Client, args: BackupArgs) -> Result<(), Error> {
    println!("{}", "⚙️ starting Backup Orchestrator".green());

    let cluster_proxy: Arc<dyn ClusterProxy> = Arc::new(
        migration_common::federation::ApiServerProxyClusterProxy::try_new(
            args.federation_group.clone(),
        )
        .await?,
    );
    let context = Arc::new(ContextData {
        client: client.clone(),
        cluster_proxy,
    });

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("backup-orchestrator-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &args.namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "backup-orchestrator-lock".to_string(),
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

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                return Ok(());
            }
            _ = tick.tick() => {}
        }

        match leadership.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                if controller_task.is_none() {
                    println!("{}", "👑 acquired leadership; starting backup controller".green());
                    let api: Api<MigrationSpec> = Api::all(client.clone());
                    let context = context.clone();
                    controller_task = Some(tokio::spawn(async move {
                        Controller::new(api, ListParams::default())
                            .run(reconcile, on_error, context)
                            .for_each(|res| async move {
                                if let Err(e) = res {
                                    tracing::warn!(error = %e, "backup reconcile failed");
                                }
                            })
                            .await;
                    }));
                }
            }
            Ok(_) => {
                if let Some(task) = controller_task.take() {
                    eprintln!("lost leadership; stopping backup controller");
                    task.abort();
                }
            }
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
            }
        }
    }
}

async fn reconcile(instance: Arc<MigrationSpec>, ctx: Arc<ContextData>) -> Result<Action, Error> {
    let spec_name = instance.name_any();
    let pod_namespace = instance.spec.workload_ref.namespace.clone();
    let mut any_resolved = false;

    for cluster in &instance.spec.source_clusters {
        let member_client = match ctx.cluster_proxy.client_for(cluster).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(cluster, error = %e, "failed to resolve cluster proxy client");
                continue;
            }
        };

        let pods = match list_workload_pods(member_client.clone(), &instance.spec.workload_ref).await
        {
            Ok(pods) => pods,
            Err(e) => {
                tracing::warn!(cluster, error = %e, "failed to resolve workload on cluster");
                continue;
            }
        };
        any_resolved = true;

        let pod_names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
        let desired = desired_checkpoint_requests(&spec_name, &pod_namespace, &pod_names);

        ensure_checkpoint_requests(
            member_client.clone(),
            &pod_namespace,
            &spec_name,
            cluster,
            &instance.spec.workload_ref,
            &instance.spec.schedule,
            instance.spec.registry.clone(),
            &desired,
        )
        .await?;

        gc_checkpoint_requests(member_client, &pod_namespace, &spec_name, cluster, &desired).await?;
    }

    if !any_resolved {
        migration_common::patch::patch_status(ctx.client.clone(), &instance, |status| {
            status.phase = migration_types::MigrationPhase::Error;
            status.message = Some("workload could not be resolved on any source cluster".to_string());
        })
        .await?;
        return Err(Error::UnresolvedWorkload(spec_name));
    }

    migration_common::patch::patch_status(ctx.client.clone(), &instance, |status| {
        status.phase = migration_types::MigrationPhase::Ready;
        status.message = None;
    })
    .await?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

fn on_error(instance: Arc<MigrationSpec>, error: &Error, _ctx: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("backup reconcile error on '{}': {error}", instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(15))
}

/// One CheckpointRequest BO wants to exist for a `(migrationSpec, cluster)`
/// pair, keyed by a deterministic name so repeated reconciles converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredCheckpointRequest {
    pub name: String,
    pub pod_ref: PodRef,
}

/// Pure expansion of a MigrationSpec's pods into the CheckpointRequests BO
/// should ensure exist. No I/O; unit tested directly.
pub fn desired_checkpoint_requests(
    migration_spec_name: &str,
    namespace: &str,
    pod_names: &[String],
) -> Vec<DesiredCheckpointRequest> {
    pod_names
        .iter()
        .map(|pod_name| DesiredCheckpointRequest {
            name: checkpoint_request_name(migration_spec_name, pod_name),
            pod_ref: PodRef {
                namespace: namespace.to_string(),
                name: pod_name.clone(),
            },
        })
        .collect()
}

async fn ensure_checkpoint_requests(
    client: Client,
    namespace: &str,
    migration_spec_name: &str,
    cluster: &str,
    workload_ref: &WorkloadRef,
    schedule: &str,
    registry: Option<migration_types::RegistryRef>,
    desired: &[DesiredCheckpointRequest],
) -> Result<(), Error> {
    let api: Api<CheckpointRequest> = Api::namespaced(client, namespace);
    for item in desired {
        if api.get_opt(&item.name).await?.is_some() {
            continue;
        }

        let mut labels = BTreeMap::new();
        labels.insert(migration_common::labels::OWNER.to_string(), migration_spec_name.to_string());
        labels.insert(migration_common::labels::CLUSTER.to_string(), cluster.to_string());

        let request = CheckpointRequest {
            metadata: ObjectMeta {
                name: Some(item.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: CheckpointRequestSpec {
                pod_ref: item.pod_ref.clone(),
                workload_ref: Some(workload_ref.clone()),
                containers: vec![],
                schedule: schedule.to_string(),
                stop_pod: false,
                registry: registry.clone(),
            },
            status: None,
        };

        api.create(&Default::default(), &request).await?;
    }
    Ok(())
}

async fn gc_checkpoint_requests(
    client: Client,
    namespace: &str,
    migration_spec_name: &str,
    cluster: &str,
    desired: &[DesiredCheckpointRequest],
) -> Result<(), Error> {
    let api: Api<CheckpointRequest> = Api::namespaced(client, namespace);
    let selector = format!(
        "{}={},{}={}",
        migration_common::labels::OWNER,
        migration_spec_name,
        migration_common::labels::CLUSTER,
        cluster
    );
    let existing = api.list(&ListParams::default().labels(&selector)).await?;
    let desired_names: std::collections::HashSet<&str> =
        desired.iter().map(|d| d.name.as_str()).collect();

    for item in existing.items {
        let name = item.name_any();
        if !desired_names.contains(name.as_str()) {
            let _ = api.delete(&name, &Default::default()).await;
        }
    }
    Ok(())
}

async fn list_workload_pods(client: Client, workload_ref: &WorkloadRef) -> Result<Vec<Pod>, Error> {
    if workload_ref.kind == "Pod" {
        let api: Api<Pod> = Api::namespaced(client, &workload_ref.namespace);
        return Ok(api.get_opt(&workload_ref.name).await?.into_iter().collect());
    }

    let (group, version) = match workload_ref.api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), workload_ref.api_version.clone()),
    };
    let gvk = GroupVersionKind::gvk(&group, &version, &workload_ref.kind);
    let (ar, _caps) = kube::discovery::pinned_kind(&client, &gvk).await?;
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), &workload_ref.namespace, &ar);
    let obj = api.get(&workload_ref.name).await?;

    let match_labels = obj
        .data
        .get("spec")
        .and_then(|s| s.get("selector"))
        .and_then(|s| s.get("matchLabels"))
        .and_then(|v| v.as_object())
        .ok_or_else(|| {
            Error::Precondition(format!(
                "workload {}/{} has no spec.selector.matchLabels",
                workload_ref.namespace, workload_ref.name
            ))
        })?;

    let selector = match_labels
        .iter()
        .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join(",");

    let pods_api: Api<Pod> = Api::namespaced(client, &workload_ref.namespace);
    let list = pods_api.list(&ListParams::default().labels(&selector)).await?;
    Ok(list.items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_requests_name_one_per_pod() {
        let pods = vec!["app-0".to_string(), "app-1".to_string()];
        let desired = desired_checkpoint_requests("spec1", "t", &pods);
        assert_eq!(desired.len(), 2);
        assert_ne!(desired[0].name, desired[1].name);
        assert_eq!(desired[0].pod_ref.name, "app-0");
    }

    #[test]
    fn rerunning_over_same_pods_is_idempotent() {
        let pods = vec!["app-0".to_string()];
        let first = desired_checkpoint_requests("spec1", "t", &pods);
        let second = desired_checkpoint_requests("spec1", "t", &pods);
        assert_eq!(first, second);
    }
}
