use clap::Parser;

/// CLI/environment configuration for the mutating admission webhook server.
#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port the admission HTTP server binds. TLS termination happens
    /// upstream of this process (sidecar or ingress), not here.
    #[arg(long, env = "ADMISSION_PORT", default_value_t = 8080)]
    pub port: u16,
}
