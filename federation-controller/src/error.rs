#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] migration_common::Error),

    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("workload '{0}' could not be resolved on any source cluster")]
    UnresolvedWorkload(String),
}
