use crate::cluster::{ClusterBackend, ClusterHandle, RemoteChannel};
use crate::model::{
    ClusterContext, ContainerPortSummary, ContainerSummary, ContextInventory, NamespaceSummary,
    PodSummary, ServiceSummary,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn running_pod(namespace: &str, name: &str) -> PodSummary {
    pod_with_phase(namespace, name, "Running")
}

pub(crate) fn pod_with_phase(namespace: &str, name: &str, phase: &str) -> PodSummary {
    PodSummary {
        name: name.to_string(),
        namespace: namespace.to_string(),
        phase: phase.to_string(),
        ready: phase == "Running",
        labels: BTreeMap::from([("app".to_string(), name.to_string())]),
        containers: vec![ContainerSummary {
            name: "main".to_string(),
            image: "busybox".to_string(),
            ports: Vec::new(),
        }],
        created: None,
    }
}

pub(crate) fn pod_with_ports(
    namespace: &str,
    name: &str,
    ports: Vec<ContainerPortSummary>,
) -> PodSummary {
    let mut pod = running_pod(namespace, name);
    pod.containers[0].ports = ports;
    pod
}

pub(crate) fn container_port(name: Option<&str>, port: u16) -> ContainerPortSummary {
    ContainerPortSummary {
        name: name.map(str::to_string),
        port,
        protocol: "TCP".to_string(),
    }
}

pub(crate) fn context_row(name: &str, is_current: bool) -> ClusterContext {
    ClusterContext {
        name: name.to_string(),
        cluster: format!("{name}-cluster"),
        user: format!("{name}-user"),
        namespace: "default".to_string(),
        is_current,
    }
}

/// Cluster handle stub. Remote channels are in-memory duplex pipes with an
/// echo loop on the far end, so bridged bytes come straight back.
pub(crate) struct MockHandle {
    context: String,
    pods: Mutex<HashMap<String, PodSummary>>,
    namespaces: Mutex<Vec<NamespaceSummary>>,
    services: Mutex<Vec<ServiceSummary>>,
    fail_list_pods: AtomicBool,
    fail_open_channel: AtomicBool,
    channels_opened: AtomicUsize,
    pods_fetched: AtomicUsize,
}

impl MockHandle {
    pub(crate) fn new(context: &str) -> Arc<Self> {
        Arc::new(Self {
            context: context.to_string(),
            pods: Mutex::new(HashMap::new()),
            namespaces: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            fail_list_pods: AtomicBool::new(false),
            fail_open_channel: AtomicBool::new(false),
            channels_opened: AtomicUsize::new(0),
            pods_fetched: AtomicUsize::new(0),
        })
    }

    pub(crate) fn insert_pod(&self, pod: PodSummary) {
        self.pods
            .lock()
            .unwrap()
            .insert(format!("{}/{}", pod.namespace, pod.name), pod);
    }

    pub(crate) fn insert_namespace(&self, name: &str) {
        self.namespaces.lock().unwrap().push(NamespaceSummary {
            name: name.to_string(),
            phase: "Active".to_string(),
            created: None,
        });
    }

    pub(crate) fn insert_service(&self, service: ServiceSummary) {
        self.services.lock().unwrap().push(service);
    }

    pub(crate) fn fail_list_pods(&self) {
        self.fail_list_pods.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_open_channel(&self, fail: bool) {
        self.fail_open_channel.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn pods_fetched(&self) -> usize {
        self.pods_fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterHandle for MockHandle {
    fn context_name(&self) -> &str {
        &self.context
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceSummary>> {
        Ok(self.namespaces.lock().unwrap().clone())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>> {
        if self.fail_list_pods.load(Ordering::SeqCst) {
            bail!("api unavailable");
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .values()
            .filter(|pod| pod.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, pod: &str) -> Result<PodSummary> {
        self.pods_fetched.fetch_add(1, Ordering::SeqCst);
        self.pods
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{pod}"))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("pod {namespace}/{pod} not found"))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceSummary>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .filter(|service| service.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn open_channel(&self, namespace: &str, pod: &str, port: u16) -> Result<RemoteChannel> {
        if self.fail_open_channel.load(Ordering::SeqCst) {
            bail!("forwarding refused for {namespace}/{pod}:{port}");
        }
        self.channels_opened.fetch_add(1, Ordering::SeqCst);

        let (near, mut far) = tokio::io::duplex(16 * 1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match far.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if far.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = far.shutdown().await;
        });
        Ok(Box::new(near))
    }
}

/// Backend stub with a scriptable set of contexts that pass validation.
/// Records probe order so tests can assert failover determinism.
pub(crate) struct MockBackend {
    inventory: Mutex<ContextInventory>,
    valid: Mutex<HashSet<String>>,
    probes: Mutex<Vec<String>>,
    handles: Mutex<HashMap<String, Arc<MockHandle>>>,
    discover_fails: AtomicBool,
}

impl MockBackend {
    pub(crate) fn new(inventory: ContextInventory, valid: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inventory: Mutex::new(inventory),
            valid: Mutex::new(valid.iter().map(|name| name.to_string()).collect()),
            probes: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
            discover_fails: AtomicBool::new(false),
        })
    }

    pub(crate) fn probes(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }

    pub(crate) fn set_valid(&self, valid: &[&str]) {
        *self.valid.lock().unwrap() = valid.iter().map(|name| name.to_string()).collect();
    }

    pub(crate) fn fail_discovery(&self, fail: bool) {
        self.discover_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn handle_for(&self, context: &str) -> Arc<MockHandle> {
        self.handles
            .lock()
            .unwrap()
            .entry(context.to_string())
            .or_insert_with(|| MockHandle::new(context))
            .clone()
    }
}

#[async_trait]
impl ClusterBackend for MockBackend {
    async fn discover(&self, _source: &Path) -> Result<ContextInventory> {
        if self.discover_fails.load(Ordering::SeqCst) {
            bail!("config source unreadable");
        }
        Ok(self.inventory.lock().unwrap().clone())
    }

    async fn connect(&self, _source: &Path, context: &str) -> Result<Arc<dyn ClusterHandle>> {
        self.probes.lock().unwrap().push(context.to_string());
        if !self.valid.lock().unwrap().contains(context) {
            bail!("capability probe refused for context '{context}'");
        }
        Ok(self.handle_for(context))
    }
}
