use owo_colors::OwoColorize;

mod error;
pub mod federation;
pub mod patch;
pub mod shutdown;

pub use error::Error;

/// Annotation keys stamped onto builder-produced images and used to resolve
/// them back to the request that produced them.
pub mod annotations {
    pub const CHECKPOINT_NAME: &str = "migration.checkpoint.io/checkpoint-name";
    pub const ROOTFS_IMAGE_NAME: &str = "migration.checkpoint.io/rootfs-image-name";
}

/// Label keys BO stamps onto the CheckpointRequests it materializes, used to
/// find and garbage-collect the set it owns without a field selector.
pub mod labels {
    pub const OWNER: &str = "migration.checkpoint.io/owner";
    pub const CLUSTER: &str = "migration.checkpoint.io/cluster";
}

/// Path the readiness probe looks for; overridable so tests don't touch the
/// real filesystem location used in a pod.
pub fn signal_ready() {
    let path =
        std::env::var("READY_FILE_PATH").unwrap_or_else(|_| "/etc/ready".to_string());
    if let Err(e) = std::fs::write(&path, "ready") {
        tracing::warn!(path = %path, error = %e, "failed to write readiness file");
    }
}

/// Call once at the top of every binary's `main`: sets up color output and
/// installs the process-wide rustls crypto provider used by every TLS client
/// in the workspace (the node-agent HTTP client, the registry push client).
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
    install_rustls_provider();
}

pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}

/// Deterministic digest of a serializable value, used wherever a stable,
/// reproducible resource name must be derived from spec content (e.g. the
/// backup orchestrator's per-pod `CheckpointRequest` naming).
pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).expect("spec must serialize");
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Prints a human-facing startup banner line, matching the reference
/// operator's colorized one-liners.
pub fn banner(msg: &str) {
    println!("{}", msg.green());
}
