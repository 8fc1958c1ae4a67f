use crate::model::{ContextInventory, NamespaceSummary, PodSummary, ServiceSummary};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte-stream forwarding channel to one (namespace, pod, port) target.
/// Closed by shutdown/drop.
pub trait RemoteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RemoteStream for T {}

pub type RemoteChannel = Box<dyn RemoteStream>;

/// Discovery and validated connection against a cluster configuration source.
///
/// `connect` is the validation probe from the connection design: it builds a
/// client bound to the requested context and issues one capability-discovery
/// call on it, succeeding iff that call completes. It must not mutate cluster
/// state.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn discover(&self, source: &Path) -> Result<ContextInventory>;

    async fn connect(&self, source: &Path, context: &str) -> Result<Arc<dyn ClusterHandle>>;
}

/// A client bound to exactly one validated context.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    fn context_name(&self) -> &str;

    async fn list_namespaces(&self) -> Result<Vec<NamespaceSummary>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>>;

    async fn get_pod(&self, namespace: &str, pod: &str) -> Result<PodSummary>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceSummary>>;

    async fn open_channel(&self, namespace: &str, pod: &str, port: u16) -> Result<RemoteChannel>;
}
