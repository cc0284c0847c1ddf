use futures::StreamExt;
use kube::{
    Api, Client, ResourceExt,
    runtime::{
        Controller,
        controller::Action,
        finalizer::{Event as Finalizer, finalizer},
        watcher::Config,
    },
};
use migration_types::CheckpointRequest;
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{args::NodeArgs, error::Error, nodeagent, pipeline, pod as podutil, scheduler::Scheduler};

const FINALIZER: &str = "checkpoint.migration/finalizer";

pub struct ContextData {
    pub client: Client,
    pub node: NodeArgs,
    pub http: reqwest::Client,
    pub scheduler: Arc<Scheduler>,
}

pub async fn run(client: Client, node: NodeArgs) -> Result<(), Error> {
    println!(
        "{}",
        format!("🚀 checkpoint-engine starting on node '{}'", node.node_name).green()
    );

    let context = Arc::new(ContextData {
        client: client.clone(),
        node: node.clone(),
        http: nodeagent::build_http_client(),
        scheduler: Scheduler::new(),
    });

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        migration_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    migration_common::signal_ready();

    let api: Api<CheckpointRequest> = Api::namespaced(client.clone(), &node.namespace);
    let controller_task = tokio::spawn(async move {
        Controller::new(api, Config::default())
            .run(reconcile, on_error, context)
            .for_each(|res| async move {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "reconcile failed");
                }
            })
            .await;
    });

    tokio::select! {
        _ = shutdown.cancelled() => {
            controller_task.abort();
        }
        _ = controller_task => {}
    }

    Ok(())
}

async fn reconcile(
    instance: Arc<CheckpointRequest>,
    ctx: Arc<ContextData>,
) -> Result<Action, Error> {
    let namespace = instance.namespace().ok_or_else(|| {
        Error::Precondition("CheckpointRequest must be namespaced".to_string())
    })?;
    let api: Api<CheckpointRequest> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, instance, |event| async {
        match event {
            Finalizer::Apply(instance) => apply(ctx.clone(), instance).await,
            Finalizer::Cleanup(instance) => cleanup(ctx.clone(), instance).await,
        }
    })
    .await
    .map_err(|e| Error::Precondition(format!("finalizer error: {e}")))
}

async fn apply(ctx: Arc<ContextData>, instance: Arc<CheckpointRequest>) -> Result<Action, Error> {
    let client = ctx.client.clone();

    if instance
        .status
        .as_ref()
        .is_some_and(|s| s.phase.is_terminal())
    {
        return Ok(Action::await_change());
    }

    let pod = podutil::get_pod(
        client.clone(),
        &instance.spec.pod_ref.namespace,
        &instance.spec.pod_ref.name,
    )
    .await?;

    let Some(pod) = pod else {
        return Ok(Action::requeue(Duration::from_secs(15)));
    };

    if !podutil::pod_is_resident(&pod, &ctx.node.node_name) {
        // Not this engine's pod; some other node's instance owns it.
        return Ok(Action::requeue(Duration::from_secs(60)));
    }

    if !podutil::pod_is_running(&pod) {
        // Pod not running is a precondition, not a failure: skip silently.
        return Ok(Action::requeue(Duration::from_secs(15)));
    }

    if instance.spec.schedule == "immediately" {
        if instance.status.is_none() {
            let result = pipeline::run(client, &ctx.node, &ctx.http, &instance, &pod).await?;
            if result.status.as_ref().is_some_and(|s| {
                s.phase == migration_types::CheckpointPhase::CompletedPodDeleted
            }) {
                ctx.scheduler
                    .remove(&(namespace_of(&instance), instance.name_any()))
                    .await;
            }
        }
        return Ok(Action::await_change());
    }

    let key = (namespace_of(&instance), instance.name_any());
    let first_run = instance
        .status
        .as_ref()
        .and_then(|s| s.last_checkpoint_time.as_ref())
        .is_none();

    let fire_ctx = ctx.clone();
    let fire_key = key.clone();
    ctx.scheduler
        .replace(key.clone(), &instance.spec.schedule, move || {
            let ctx = fire_ctx.clone();
            let key = fire_key.clone();
            async move {
                if let Err(e) = fire_scheduled_capture(ctx, key.clone()).await {
                    tracing::warn!(namespace = %key.0, name = %key.1, error = %e, "scheduled capture failed");
                }
            }
        })
        .await?;

    if first_run {
        let result = pipeline::run(client, &ctx.node, &ctx.http, &instance, &pod).await?;
        if result
            .status
            .as_ref()
            .is_some_and(|s| s.phase == migration_types::CheckpointPhase::CompletedPodDeleted)
        {
            ctx.scheduler.remove(&key).await;
        }
    }

    Ok(Action::await_change())
}

async fn fire_scheduled_capture(
    ctx: Arc<ContextData>,
    key: (String, String),
) -> Result<(), Error> {
    let (namespace, name) = key.clone();
    let api: Api<CheckpointRequest> = Api::namespaced(ctx.client.clone(), &namespace);
    let instance = match api.get_opt(&name).await? {
        Some(instance) => instance,
        None => return Ok(()),
    };

    if instance.status.as_ref().is_some_and(|s| s.phase.is_terminal()) {
        return Ok(());
    }

    let pod = podutil::get_pod(
        ctx.client.clone(),
        &instance.spec.pod_ref.namespace,
        &instance.spec.pod_ref.name,
    )
    .await?;
    let Some(pod) = pod else { return Ok(()) };
    if !podutil::pod_is_resident(&pod, &ctx.node.node_name) || !podutil::pod_is_running(&pod) {
        return Ok(());
    }

    let result = pipeline::run(ctx.client.clone(), &ctx.node, &ctx.http, &instance, &pod).await?;
    if result
        .status
        .as_ref()
        .is_some_and(|s| s.phase == migration_types::CheckpointPhase::CompletedPodDeleted)
    {
        ctx.scheduler.remove(&key).await;
    }
    Ok(())
}

async fn cleanup(ctx: Arc<ContextData>, instance: Arc<CheckpointRequest>) -> Result<Action, Error> {
    let key = (namespace_of(&instance), instance.name_any());
    ctx.scheduler.remove(&key).await;
    Ok(Action::await_change())
}

fn namespace_of(instance: &CheckpointRequest) -> String {
    instance.namespace().unwrap_or_default()
}

fn on_error(instance: Arc<CheckpointRequest>, error: &Error, _ctx: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "reconciliation error on '{}/{}': {error}",
            instance.namespace().unwrap_or_default(),
            instance.name_any()
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}
