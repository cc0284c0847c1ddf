use clap::Parser;

/// CLI/environment configuration for one node's checkpoint-engine instance.
#[derive(Parser, Debug, Clone)]
pub struct NodeArgs {
    /// The node this instance is bound to. Every reconcile ignores
    /// CheckpointRequests whose pod isn't scheduled here.
    #[arg(long, env = "NODE_NAME", required = true)]
    pub node_name: String,

    /// Node IP used to reach the local node agent's checkpoint endpoint.
    /// Falls back to `node_name` when unset (works when DNS resolves the
    /// node name to its host, which kubelet-adjacent agents usually expect).
    #[arg(long, env = "NODE_IP")]
    pub node_ip: Option<String>,

    /// Port the node agent's checkpoint API listens on.
    #[arg(long, env = "NODE_AGENT_PORT", default_value_t = 10250)]
    pub node_agent_port: u16,

    /// Root directory the node agent writes checkpoint tarballs into.
    #[arg(
        long,
        env = "CHECKPOINT_ROOT",
        default_value = "/var/lib/kubelet/checkpoints"
    )]
    pub checkpoint_root: String,

    /// OCI builder binary invoked as a subprocess to assemble and push
    /// checkpoint images.
    #[arg(long, env = "BUILDER_BIN", default_value = "buildah")]
    pub builder_bin: String,

    /// Path to the service-account token used to authenticate to the node
    /// agent. Overridable for tests.
    #[arg(
        long,
        env = "SERVICE_ACCOUNT_TOKEN_PATH",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    pub service_account_token_path: String,

    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,
}

impl NodeArgs {
    pub fn node_agent_base_url(&self) -> String {
        let host = self.node_ip.as_deref().unwrap_or(&self.node_name);
        format!("https://{host}:{port}", host = host, port = self.node_agent_port)
    }
}
