use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Reference to the federated workload a [`MigrationSpec`] or [`CheckpointRequest`]
/// ultimately backs.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct WorkloadRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Reference to a captured/target container within a request.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ContainerEntry {
    pub name: String,
    pub target_image: Option<String>,
}

/// Pointer to a secret-like blob carrying registry credentials.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct CredentialsRef {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RegistryRef {
    pub url: String,
    pub credentials_ref: CredentialsRef,
}

/// Resolved credential values, as read out of the blob named by [`CredentialsRef`].
/// Not part of any CRD's wire schema; the admission/checkpoint engine code reads
/// this out of a Kubernetes Secret at runtime.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub registry: Option<String>,
}

fn default_schedule() -> String {
    "immediately".to_string()
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "migration.checkpoint.io",
    version = "v1",
    kind = "MigrationSpec",
    plural = "migrationspecs",
    derive = "PartialEq",
    status = "MigrationSpecStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
pub struct MigrationSpecSpec {
    pub workload_ref: WorkloadRef,
    pub source_clusters: Vec<String>,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub registry: Option<RegistryRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct MigrationSpecStatus {
    pub phase: MigrationPhase,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum MigrationPhase {
    #[default]
    Pending,
    Reconciling,
    Ready,
    Error,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "migration.checkpoint.io",
    version = "v1",
    kind = "CheckpointRequest",
    plural = "checkpointrequests",
    derive = "PartialEq",
    status = "CheckpointRequestStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
pub struct CheckpointRequestSpec {
    pub pod_ref: PodRef,
    #[serde(default)]
    pub workload_ref: Option<WorkloadRef>,
    #[serde(default)]
    pub containers: Vec<ContainerEntry>,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub stop_pod: bool,
    #[serde(default)]
    pub registry: Option<RegistryRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct CheckpointFileEntry {
    pub container_name: String,
    pub file_path: String,
    pub checkpoint_time: Time,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct CapturedImage {
    pub container_name: String,
    pub image_name: String,
    pub build_time: Time,
    pub pushed: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct CheckpointRequestStatus {
    pub phase: CheckpointPhase,
    pub message: Option<String>,
    #[serde(default)]
    pub checkpoint_files: Vec<CheckpointFileEntry>,
    #[serde(default)]
    pub captured_images: Vec<CapturedImage>,
    pub last_checkpoint_time: Option<Time>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum CheckpointPhase {
    #[default]
    Pending,
    Checkpointing,
    Checkpointed,
    ImageBuilding,
    ImageBuilt,
    ImagePushing,
    ImagePushed,
    Completed,
    CompletedPodDeleted,
    CompletedWithError,
    Failed,
}

impl CheckpointPhase {
    /// True once no further capture work should happen for this request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointPhase::Completed
                | CheckpointPhase::CompletedPodDeleted
                | CheckpointPhase::CompletedWithError
                | CheckpointPhase::Failed
        )
    }
}

impl FromStr for CheckpointPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(CheckpointPhase::Pending),
            "Checkpointing" => Ok(CheckpointPhase::Checkpointing),
            "Checkpointed" => Ok(CheckpointPhase::Checkpointed),
            "ImageBuilding" => Ok(CheckpointPhase::ImageBuilding),
            "ImageBuilt" => Ok(CheckpointPhase::ImageBuilt),
            "ImagePushing" => Ok(CheckpointPhase::ImagePushing),
            "ImagePushed" => Ok(CheckpointPhase::ImagePushed),
            "Completed" => Ok(CheckpointPhase::Completed),
            "CompletedPodDeleted" => Ok(CheckpointPhase::CompletedPodDeleted),
            "CompletedWithError" => Ok(CheckpointPhase::CompletedWithError),
            "Failed" => Ok(CheckpointPhase::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CheckpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointPhase::Pending => write!(f, "Pending"),
            CheckpointPhase::Checkpointing => write!(f, "Checkpointing"),
            CheckpointPhase::Checkpointed => write!(f, "Checkpointed"),
            CheckpointPhase::ImageBuilding => write!(f, "ImageBuilding"),
            CheckpointPhase::ImageBuilt => write!(f, "ImageBuilt"),
            CheckpointPhase::ImagePushing => write!(f, "ImagePushing"),
            CheckpointPhase::ImagePushed => write!(f, "ImagePushed"),
            CheckpointPhase::Completed => write!(f, "Completed"),
            CheckpointPhase::CompletedPodDeleted => write!(f, "CompletedPodDeleted"),
            CheckpointPhase::CompletedWithError => write!(f, "CompletedWithError"),
            CheckpointPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "migration.checkpoint.io",
    version = "v1",
    kind = "RestoreRequest",
    plural = "restorerequests",
    derive = "PartialEq",
    status = "RestoreRequestStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
pub struct RestoreRequestSpec {
    pub backup_ref: String,
    #[serde(default)]
    pub pod_ref: Option<PodRef>,
    #[serde(default)]
    pub pod_generate_name_prefix: Option<String>,
    #[serde(default)]
    pub containers: Vec<RestoreContainerEntry>,
    #[serde(default)]
    pub default_image: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RestoreContainerEntry {
    pub name: String,
    pub image: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RestoreRequestStatus {
    pub phase: RestorePhase,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum RestorePhase {
    #[default]
    Pending,
    Propagated,
    WorkRewritten,
    Error,
}

/// The federation's view of which clusters currently back a workload. Not a CRD
/// owned by this system; it is read (never written) through [`migration_common::federation::BindingLookup`].
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct WorkloadBinding {
    pub workload_ref: WorkloadRef,
    pub clusters: Vec<String>,
}

pub type ExtraLabels = BTreeMap<String, String>;
