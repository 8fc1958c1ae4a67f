use thiserror::Error;

/// Stable operation names attached to error notifications so observers can
/// attribute a failure without parsing message text.
pub mod operation {
    pub const INITIALIZATION: &str = "initialization";
    pub const SWITCH_CONTEXT: &str = "switchContext";
    pub const GET_CONTEXTS: &str = "getContexts";
    pub const GET_NAMESPACES: &str = "getNamespaces";
    pub const GET_PODS: &str = "getPods";
    pub const GET_POD_PORTS: &str = "getPodPorts";
    pub const START_PORT_FORWARD: &str = "startPortForward";
    pub const STOP_PORT_FORWARD: &str = "stopPortForward";
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no usable context found in {source_name}")]
    Configuration { source_name: String },

    #[error("context '{context}' failed validation: {reason}")]
    Validation { context: String, reason: String },

    #[error("cluster client is not initialized")]
    NotInitialized,

    #[error("forward '{0}' is already active")]
    DuplicateForward(String),

    #[error("pod {namespace}/{pod} is not running (phase: {phase})")]
    PodNotRunning {
        namespace: String,
        pod: String,
        phase: String,
    },

    #[error("remote forwarding channel failed: {detail}")]
    RemoteChannel { detail: String },

    #[error("failed to bind local port {port}")]
    LocalBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn remote_channel(err: impl std::fmt::Display) -> Self {
        Self::RemoteChannel {
            detail: err.to_string(),
        }
    }
}
