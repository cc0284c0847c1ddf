use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Client;
use migration_common::patch::patch_status;
use migration_types::{CapturedImage, CheckpointFileEntry, CheckpointPhase, CheckpointRequest};

use crate::error::Error;

pub async fn set_phase(
    client: Client,
    instance: &CheckpointRequest,
    phase: CheckpointPhase,
    message: Option<String>,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, move |status| {
        status.phase = phase;
        status.message = message.clone();
    })
    .await?)
}

pub async fn append_checkpoint_file(
    client: Client,
    instance: &CheckpointRequest,
    entry: CheckpointFileEntry,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, move |status| {
        status
            .checkpoint_files
            .retain(|e| e.container_name != entry.container_name);
        status.checkpoint_files.push(entry.clone());
        status.phase = CheckpointPhase::Checkpointed;
    })
    .await?)
}

pub async fn append_captured_image(
    client: Client,
    instance: &CheckpointRequest,
    entry: CapturedImage,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, move |status| {
        let dup = status
            .captured_images
            .iter()
            .any(|e| e.container_name == entry.container_name && e.image_name == entry.image_name);
        if !dup {
            status.captured_images.push(entry.clone());
        }
    })
    .await?)
}

pub async fn complete(
    client: Client,
    instance: &CheckpointRequest,
    last_checkpoint_time: Time,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, move |status| {
        status.phase = CheckpointPhase::Completed;
        status.last_checkpoint_time = Some(last_checkpoint_time.clone());
    })
    .await?)
}

pub async fn complete_pod_deleted(
    client: Client,
    instance: &CheckpointRequest,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, |status| {
        status.phase = CheckpointPhase::CompletedPodDeleted;
    })
    .await?)
}

pub async fn complete_with_error(
    client: Client,
    instance: &CheckpointRequest,
    message: String,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, move |status| {
        status.phase = CheckpointPhase::CompletedWithError;
        status.message = Some(message.clone());
    })
    .await?)
}

pub async fn fail(
    client: Client,
    instance: &CheckpointRequest,
    message: String,
) -> Result<CheckpointRequest, Error> {
    Ok(patch_status(client, instance, move |status| {
        status.phase = CheckpointPhase::Failed;
        status.message = Some(message.clone());
    })
    .await?)
}
