use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Client;
use migration_common::annotations;
use migration_types::{CapturedImage, CheckpointFileEntry, CheckpointRequest, RegistryCredentials};
use std::path::Path;
use std::time::Duration;

use crate::args::NodeArgs;
use crate::error::Error;
use crate::naming::{
    checkpoint_file_pattern, default_target_image, pick_most_recent_checkpoint_file,
    registry_host_or_default,
};
use crate::pod as podutil;
use crate::{actions, nodeagent};

const FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// Runs the full capture pipeline (spec §4.1) for every container named in
/// the request (or every container in the pod, when the request names
/// none). Containers are processed sequentially; a failure in one aborts the
/// request but containers already recorded remain recorded.
pub async fn run(
    client: Client,
    node: &NodeArgs,
    http: &reqwest::Client,
    instance: &CheckpointRequest,
    pod: &Pod,
) -> Result<CheckpointRequest, Error> {
    let containers: Vec<String> = if instance.spec.containers.is_empty() {
        podutil::container_names(pod)
    } else {
        instance
            .spec
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect()
    };

    let mut current = instance.clone();
    for name in &containers {
        current = match run_one_container(client.clone(), node, http, &current, pod, name).await {
            Ok(updated) => updated,
            Err(e) => {
                actions::fail(client.clone(), &current, e.to_string()).await?;
                return Err(e);
            }
        };
    }

    let now = Time(Utc::now());
    current = actions::complete(client.clone(), &current, now).await?;

    if current.spec.stop_pod {
        let api: kube::Api<Pod> =
            kube::Api::namespaced(client.clone(), &instance.spec.pod_ref.namespace);
        match api.delete(&instance.spec.pod_ref.name, &Default::default()).await {
            Ok(_) => {
                current = actions::complete_pod_deleted(client, &current).await?;
            }
            Err(e) => {
                current =
                    actions::complete_with_error(client, &current, format!("failed to delete pod: {e}"))
                        .await?;
            }
        }
    }

    Ok(current)
}

async fn run_one_container(
    client: Client,
    node: &NodeArgs,
    http: &reqwest::Client,
    instance: &CheckpointRequest,
    pod: &Pod,
    container_name: &str,
) -> Result<CheckpointRequest, Error> {
    let mut instance = instance.clone();

    // Step 1: resume check.
    let existing_file = instance
        .status
        .as_ref()
        .and_then(|s| s.checkpoint_files.iter().find(|e| e.container_name == container_name))
        .cloned();
    let already_imaged = instance
        .status
        .as_ref()
        .is_some_and(|s| s.captured_images.iter().any(|e| e.container_name == container_name));

    let file_path = if let Some(entry) = existing_file {
        if Path::new(&entry.file_path).exists() {
            entry.file_path
        } else if already_imaged {
            return Ok(instance);
        } else {
            capture(client.clone(), node, http, &mut instance, pod, container_name).await?
        }
    } else {
        capture(client.clone(), node, http, &mut instance, pod, container_name).await?
    };

    // Step 4: resolve base image.
    let base_image = podutil::container_image(pod, container_name)
        .ok_or_else(|| {
            Error::Precondition(format!(
                "pod '{}' has no container named '{}'",
                pod.metadata.name.clone().unwrap_or_default(),
                container_name
            ))
        })?
        .to_string();

    // Step 5: resolve target image name.
    let target_image = instance
        .spec
        .containers
        .iter()
        .find(|c| c.name == container_name)
        .and_then(|c| c.target_image.clone())
        .unwrap_or_else(|| {
            default_target_image(&instance.spec.pod_ref.name, container_name, Utc::now())
        });

    instance = actions::set_phase(
        client.clone(),
        &instance,
        migration_types::CheckpointPhase::ImageBuilding,
        None,
    )
    .await?;

    // Step 6: build.
    build_image(&node.builder_bin, &file_path, &target_image, &base_image).await?;

    instance = actions::set_phase(
        client.clone(),
        &instance,
        migration_types::CheckpointPhase::ImageBuilt,
        None,
    )
    .await?;

    let mut pushed = false;
    if let Some(registry) = instance.spec.registry.clone() {
        instance = actions::set_phase(
            client.clone(),
            &instance,
            migration_types::CheckpointPhase::ImagePushing,
            None,
        )
        .await?;

        let creds = fetch_registry_credentials(client.clone(), &registry).await?;
        let host = registry_host_or_default(Some(&registry.url)).to_string();
        push_image(&node.builder_bin, &target_image, &host, &creds).await?;
        pushed = true;

        instance = actions::set_phase(
            client.clone(),
            &instance,
            migration_types::CheckpointPhase::ImagePushed,
            None,
        )
        .await?;
    }

    // Step 8: record image.
    instance = actions::append_captured_image(
        client.clone(),
        &instance,
        CapturedImage {
            container_name: container_name.to_string(),
            image_name: target_image,
            build_time: Time(Utc::now()),
            pushed,
        },
    )
    .await?;

    // Step 9: cleanup.
    if pushed || instance.spec.registry.is_none() {
        let _ = tokio::fs::remove_file(&file_path).await;
    }

    Ok(instance)
}

async fn capture(
    client: Client,
    node: &NodeArgs,
    http: &reqwest::Client,
    instance: &mut CheckpointRequest,
    pod: &Pod,
    container_name: &str,
) -> Result<String, Error> {
    *instance = actions::set_phase(
        client.clone(),
        instance,
        migration_types::CheckpointPhase::Checkpointing,
        None,
    )
    .await?;

    let token = tokio::fs::read_to_string(&node.service_account_token_path)
        .await
        .unwrap_or_default();
    let namespace = &instance.spec.pod_ref.namespace;
    let pod_name = &instance.spec.pod_ref.name;

    let file_path = match nodeagent::checkpoint(
        http,
        &node.node_agent_base_url(),
        namespace,
        pod_name,
        container_name,
        &token,
    )
    .await
    {
        Ok(items) => items.into_iter().next().ok_or_else(|| {
            Error::Precondition("node agent returned an empty checkpoint item list".to_string())
        })?,
        Err(nodeagent::NodeAgentError::MalformedBody(_)) => {
            // Unparseable body: fall back to scanning the checkpoint root
            // for the expected filename pattern.
            scan_checkpoint_root(&node.checkpoint_root, namespace, pod_name, container_name)
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    *instance = actions::append_checkpoint_file(
        client,
        instance,
        CheckpointFileEntry {
            container_name: container_name.to_string(),
            file_path: file_path.clone(),
            checkpoint_time: Time(Utc::now()),
        },
    )
    .await?;

    let _ = pod; // pod kept for signature symmetry/future use (e.g. uid-scoped paths)
    Ok(file_path)
}

async fn scan_checkpoint_root(
    root: &str,
    namespace: &str,
    pod_name: &str,
    container_name: &str,
) -> Result<String, Error> {
    let pattern = checkpoint_file_pattern(namespace, pod_name, container_name);
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&pattern) && name.ends_with(".tar") {
            let mtime = entry.metadata().await?.modified()?;
            candidates.push((entry.path().to_string_lossy().to_string(), mtime));
        }
    }
    pick_most_recent_checkpoint_file(&candidates, std::time::SystemTime::now(), FRESHNESS_WINDOW)
        .ok_or_else(|| {
            Error::Precondition(format!(
                "no checkpoint artifact found under '{root}' matching pattern '{pattern}*'"
            ))
        })
}

async fn build_image(
    builder_bin: &str,
    tarball_path: &str,
    target_image: &str,
    base_image: &str,
) -> Result<(), Error> {
    let working = run_capture_output(builder_bin, &["from", "scratch"]).await?;
    let working = working.trim();

    run_checked(builder_bin, &["add", working, tarball_path, "/"]).await?;
    run_checked(
        builder_bin,
        &[
            "config",
            &format!("--annotation={}={}", annotations::CHECKPOINT_NAME, target_image),
            working,
        ],
    )
    .await?;
    run_checked(
        builder_bin,
        &[
            "config",
            &format!("--annotation={}={}", annotations::ROOTFS_IMAGE_NAME, base_image),
            working,
        ],
    )
    .await?;
    run_checked(builder_bin, &["commit", working, target_image]).await?;

    // Cleanup always runs, errors ignored (matches the "defer" style rm).
    let _ = run_checked(builder_bin, &["rm", working]).await;
    Ok(())
}

async fn push_image(
    builder_bin: &str,
    local_ref: &str,
    host: &str,
    creds: &RegistryCredentials,
) -> Result<(), Error> {
    run_checked(
        builder_bin,
        &["login", "-u", &creds.username, "-p", &creds.password, host],
    )
    .await?;
    run_checked(
        builder_bin,
        &["push", local_ref, &format!("{host}/{local_ref}")],
    )
    .await?;
    Ok(())
}

async fn fetch_registry_credentials(
    client: Client,
    registry: &migration_types::RegistryRef,
) -> Result<RegistryCredentials, Error> {
    use k8s_openapi::api::core::v1::Secret;
    let namespace = registry
        .credentials_ref
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let api: kube::Api<Secret> = kube::Api::namespaced(client, &namespace);
    let secret = api.get(&registry.credentials_ref.name).await?;
    let data = secret.data.unwrap_or_default();
    let decode = |key: &str| -> String {
        data.get(key)
            .map(|b| String::from_utf8_lossy(&b.0).to_string())
            .unwrap_or_default()
    };
    Ok(RegistryCredentials {
        username: decode("username"),
        password: decode("password"),
        registry: Some(registry.url.clone()),
    })
}

async fn run_checked(bin: &str, args: &[&str]) -> Result<(), Error> {
    run_capture_output(bin, args).await.map(|_| ())
}

async fn run_capture_output(bin: &str, args: &[&str]) -> Result<String, Error> {
    let output = tokio::process::Command::new(bin).args(args).output().await?;
    if !output.status.success() {
        return Err(Error::Subprocess {
            command: format!("{bin} {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
