use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, Client,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{clone::Clone, fmt::Debug, time::Duration};

use crate::Error;

pub const MANAGER_NAME: &str = "checkpoint-migration";

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(300),
];

pub trait Object<S: Status> {
    /// Returns a mutable reference to the status object, initializing it
    /// with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

pub trait Status {
    fn set_last_updated(&mut self, last_updated: Time);
}

/// Patches the resource's status with `f`, retrying on optimistic-concurrency
/// conflicts by refetching the object and reapplying `f` to the fresh copy.
/// Gives up after three attempts with 100/200/300ms backoff between tries.
pub async fn patch_status<S: Status, T>(
    client: Client,
    instance: &T,
    f: impl Fn(&mut S) + Clone,
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let name = instance
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.name".to_string()))?;
    let namespace = instance
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("resource is missing metadata.namespace".to_string()))?;
    let api: Api<T> = Api::namespaced(client, &namespace);

    let mut current = instance.clone();
    for backoff in RETRY_BACKOFFS.iter() {
        let patch = Patch::Json::<T>({
            let mut modified = current.clone();
            let status = modified.mut_status();
            f.clone()(status);
            status.set_last_updated(Time::from(k8s_openapi::jiff::Timestamp::now()));
            json_patch::diff(
                &serde_json::to_value(&current)?,
                &serde_json::to_value(&modified)?,
            )
        });

        match api.patch_status(&name, &PatchParams::apply(MANAGER_NAME), &patch).await {
            Ok(updated) => return Ok(updated),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                tokio::time::sleep(*backoff).await;
                current = api.get(&name).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Conflict {
        attempts: RETRY_BACKOFFS.len() as u32,
    })
}

impl Object<migration_types::CheckpointRequestStatus> for migration_types::CheckpointRequest {
    fn mut_status(&mut self) -> &mut migration_types::CheckpointRequestStatus {
        if self.status.is_none() {
            self.status = Some(Default::default());
        }
        self.status.as_mut().unwrap()
    }
}

impl Status for migration_types::CheckpointRequestStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }
}

impl Object<migration_types::RestoreRequestStatus> for migration_types::RestoreRequest {
    fn mut_status(&mut self) -> &mut migration_types::RestoreRequestStatus {
        if self.status.is_none() {
            self.status = Some(Default::default());
        }
        self.status.as_mut().unwrap()
    }
}

impl Status for migration_types::RestoreRequestStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }
}

impl Object<migration_types::MigrationSpecStatus> for migration_types::MigrationSpec {
    fn mut_status(&mut self) -> &mut migration_types::MigrationSpecStatus {
        if self.status.is_none() {
            self.status = Some(Default::default());
        }
        self.status.as_mut().unwrap()
    }
}

impl Status for migration_types::MigrationSpecStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }
}
