use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CheckpointResponse {
    items: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeAgentError {
    #[error("node agent request transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node agent returned non-success status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("node agent response body was not valid JSON: {0}")]
    MalformedBody(serde_json::Error),

    #[error("node agent returned an empty checkpoint item list")]
    EmptyItems,
}

/// Calls the node agent's checkpoint endpoint for one container. TLS
/// verification is disabled: the peer is always the local node agent,
/// addressed over the node's own IP/loopback, which does not present a
/// certificate this client has any basis to validate.
///
/// A non-success HTTP status is a genuine failure and propagates as such.
/// Only a malformed (unparseable) response body is treated as recoverable —
/// callers fall back to scanning the checkpoint root for the artifact.
pub async fn checkpoint(
    http: &reqwest::Client,
    base_url: &str,
    namespace: &str,
    pod_name: &str,
    container_name: &str,
    bearer_token: &str,
) -> Result<Vec<String>, NodeAgentError> {
    let url = format!(
        "{base}/checkpoint/{namespace}/{pod}/{container}?timeout=300",
        base = base_url,
        namespace = namespace,
        pod = pod_name,
        container = container_name,
    );
    let resp = http
        .post(&url)
        .bearer_auth(bearer_token)
        .header("Content-Type", "application/json")
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(NodeAgentError::BadStatus {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: CheckpointResponse =
        serde_json::from_str(&body).map_err(NodeAgentError::MalformedBody)?;
    if parsed.items.is_empty() {
        return Err(NodeAgentError::EmptyItems);
    }
    Ok(parsed.items)
}

pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .expect("build node-agent http client")
}
