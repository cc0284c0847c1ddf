#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("subprocess '{command}' failed: {stderr}")]
    Subprocess { command: String, stderr: String },

    #[error("status update conflict not resolved after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
