#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] migration_common::Error),

    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("node agent request failed: {0}")]
    NodeAgent(#[from] crate::nodeagent::NodeAgentError),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid cron expression '{expr}': {source}")]
    Cron {
        expr: String,
        source: cron::error::Error,
    },

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("subprocess '{command}' failed: {stderr}")]
    Subprocess { command: String, stderr: String },
}
