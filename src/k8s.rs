use crate::cluster::{ClusterBackend, ClusterHandle, RemoteChannel};
use crate::model::{
    ClusterContext, ContainerPortSummary, ContainerSummary, ContextInventory, NamespaceSummary,
    PodSummary, ServicePortSummary, ServiceSummary, TargetPort,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerPort, Namespace, Pod, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridges the k8s-openapi time representation (jiff) to the chrono
/// `DateTime<Utc>` used across the model.
fn to_chrono(time: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Time) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(time.0.as_second(), time.0.subsec_nanosecond() as u32)
}

/// Cluster backend over a kubeconfig file and the live Kubernetes API.
#[derive(Debug, Default)]
pub struct KubeBackend;

impl KubeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn discover(&self, source: &Path) -> Result<ContextInventory> {
        let kubeconfig = Kubeconfig::read_from(source)
            .with_context(|| format!("failed to read kubeconfig {}", source.display()))?;
        Ok(build_inventory(&kubeconfig))
    }

    async fn connect(&self, source: &Path, context: &str) -> Result<Arc<dyn ClusterHandle>> {
        let kubeconfig = Kubeconfig::read_from(source)
            .with_context(|| format!("failed to read kubeconfig {}", source.display()))?;
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            cluster: None,
            user: None,
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .with_context(|| format!("failed to build client config for context '{context}'"))?;
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        // Capability probe, bounded so an unreachable cluster cannot stall
        // failover. Read-only against the discovery endpoint.
        tokio::time::timeout(PROBE_TIMEOUT, client.list_core_api_versions())
            .await
            .map_err(|_| anyhow::anyhow!("capability probe timed out for context '{context}'"))?
            .with_context(|| format!("capability probe failed for context '{context}'"))?;

        Ok(Arc::new(KubeHandle {
            client,
            context: context.to_string(),
        }))
    }
}

fn build_inventory(kubeconfig: &Kubeconfig) -> ContextInventory {
    let current = kubeconfig.current_context.clone();
    let contexts = kubeconfig
        .contexts
        .iter()
        .filter_map(|named| {
            let context = named.context.as_ref()?;
            Some(ClusterContext {
                name: named.name.clone(),
                cluster: context.cluster.clone(),
                user: context.user.clone().unwrap_or_else(|| "-".to_string()),
                namespace: context
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
                is_current: Some(&named.name) == current.as_ref(),
            })
        })
        .collect();
    ContextInventory { contexts, current }
}

pub struct KubeHandle {
    client: Client,
    context: String,
}

#[async_trait]
impl ClusterHandle for KubeHandle {
    fn context_name(&self) -> &str {
        &self.context
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceSummary>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .context("failed to list namespaces")?;
        Ok(list
            .into_iter()
            .map(|namespace| NamespaceSummary {
                name: namespace.name_any(),
                phase: namespace
                    .status
                    .as_ref()
                    .and_then(|status| status.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                created: namespace
                    .metadata
                    .creation_timestamp
                    .as_ref()
                    .and_then(to_chrono),
            })
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list pods in {namespace}"))?;
        Ok(list.into_iter().map(pod_summary).collect())
    }

    async fn get_pod(&self, namespace: &str, pod: &str) -> Result<PodSummary> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(pod)
            .await
            .with_context(|| format!("failed to fetch pod {namespace}/{pod}"))?;
        Ok(pod_summary(pod))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceSummary>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = services
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list services in {namespace}"))?;
        Ok(list.into_iter().map(service_summary).collect())
    }

    async fn open_channel(&self, namespace: &str, pod: &str, port: u16) -> Result<RemoteChannel> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut forwarder = pods.portforward(pod, &[port]).await.with_context(|| {
            format!("failed to open forwarding channel to {namespace}/{pod}:{port}")
        })?;
        let stream = forwarder
            .take_stream(port)
            .context("forwarding channel did not yield a stream")?;

        // The forwarder drives the websocket connection; park it until the
        // channel closes and surface protocol errors in the log.
        let target = format!("{namespace}/{pod}:{port}");
        tokio::spawn(async move {
            if let Err(err) = forwarder.join().await {
                debug!(%target, error = %err, "port-forward driver ended with error");
            }
        });

        Ok(Box::new(stream))
    }
}

fn pod_summary(pod: Pod) -> PodSummary {
    let name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let ready = pod
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        });
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|container| ContainerSummary {
                    name: container.name.clone(),
                    image: container.image.clone().unwrap_or_else(|| "-".to_string()),
                    ports: container
                        .ports
                        .as_ref()
                        .into_iter()
                        .flatten()
                        .filter_map(container_port_summary)
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();
    let created = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .and_then(to_chrono);

    PodSummary {
        name,
        namespace,
        phase,
        ready,
        labels: pod.metadata.labels.unwrap_or_default(),
        containers,
        created,
    }
}

fn container_port_summary(port: &ContainerPort) -> Option<ContainerPortSummary> {
    Some(ContainerPortSummary {
        name: port.name.clone(),
        port: u16::try_from(port.container_port).ok()?,
        protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
    })
}

fn service_summary(service: Service) -> ServiceSummary {
    let name = service.name_any();
    let namespace = service.namespace().unwrap_or_default();
    let (selector, ports) = service
        .spec
        .map(|spec| {
            (
                spec.selector.unwrap_or_default(),
                spec.ports
                    .unwrap_or_default()
                    .iter()
                    .filter_map(service_port_summary)
                    .collect(),
            )
        })
        .unwrap_or_default();

    ServiceSummary {
        name,
        namespace,
        selector,
        ports,
    }
}

fn service_port_summary(port: &ServicePort) -> Option<ServicePortSummary> {
    let target_port = match port.target_port.as_ref() {
        Some(IntOrString::Int(value)) => Some(TargetPort::Number(u16::try_from(*value).ok()?)),
        Some(IntOrString::String(value)) => Some(TargetPort::Name(value.clone())),
        None => None,
    };
    Some(ServicePortSummary {
        name: port.name.clone(),
        port: u16::try_from(port.port).ok()?,
        target_port,
        protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::KubeBackend;
    use crate::cluster::ClusterBackend;
    use std::io::Write;
    use std::path::Path;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: staging
clusters:
  - name: staging-cluster
    cluster:
      server: https://staging.example.com:6443
  - name: prod-cluster
    cluster:
      server: https://prod.example.com:6443
contexts:
  - name: staging
    context:
      cluster: staging-cluster
      user: staging-admin
      namespace: apps
  - name: prod
    context:
      cluster: prod-cluster
      user: prod-admin
users:
  - name: staging-admin
    user: {}
  - name: prod-admin
    user: {}
"#;

    #[tokio::test]
    async fn discover_maps_contexts_and_current() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();

        let inventory = KubeBackend::new().discover(file.path()).await.unwrap();
        assert_eq!(inventory.current.as_deref(), Some("staging"));
        assert_eq!(inventory.contexts.len(), 2);

        let staging = &inventory.contexts[0];
        assert_eq!(staging.name, "staging");
        assert_eq!(staging.cluster, "staging-cluster");
        assert_eq!(staging.user, "staging-admin");
        assert_eq!(staging.namespace, "apps");
        assert!(staging.is_current);

        let prod = &inventory.contexts[1];
        assert_eq!(prod.namespace, "default");
        assert!(!prod.is_current);

        assert_eq!(inventory.candidates(), vec!["staging", "prod"]);
    }

    #[tokio::test]
    async fn discover_fails_for_a_missing_source() {
        let result = KubeBackend::new()
            .discover(Path::new("/nonexistent/kubeconfig"))
            .await;
        assert!(result.is_err());
    }
}
