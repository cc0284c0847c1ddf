#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] migration_common::Error),

    #[error("Kubernetes reported error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("precondition not met: {0}")]
    Precondition(String),
}
