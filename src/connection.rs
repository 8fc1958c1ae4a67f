use crate::cluster::{ClusterBackend, ClusterHandle};
use crate::error::{Error, operation};
use crate::events::{ErrorRecord, NotificationHub, Subscription};
use crate::model::{
    ClusterContext, ConnectionState, ContextInventory, NamespaceSummary, PodSummary,
    PortDescriptor, ServiceSummary, TargetPort,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const INIT_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Owns the validated cluster client and the current context inventory.
/// Discovery, validation and failover all run through here; queries degrade
/// to empty results and report through the notification hub instead of
/// propagating.
pub struct ConnectionManager {
    backend: Arc<dyn ClusterBackend>,
    handle: RwLock<Option<Arc<dyn ClusterHandle>>>,
    inventory: Mutex<ContextInventory>,
    source: Mutex<Option<PathBuf>>,
    state: Mutex<ConnectionState>,
    hub: NotificationHub,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn ClusterBackend>, hub: NotificationHub) -> Self {
        Self {
            backend,
            handle: RwLock::new(None),
            inventory: Mutex::new(ContextInventory::default()),
            source: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            hub,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Discovers contexts from the config source and connects to the first
    /// one that validates: the designated current context, then the rest in
    /// listed order. The whole sequence is retried from scratch a bounded
    /// number of times (the source may have changed on disk between
    /// attempts) before giving up.
    pub async fn initialize(&self, source: &Path) -> bool {
        *self.source.lock().expect("source lock poisoned") = Some(source.to_path_buf());
        self.set_state(ConnectionState::Connecting);

        let mut last_error = Error::Configuration {
            source_name: source.display().to_string(),
        };
        for attempt in 1..=INIT_ATTEMPTS {
            match self.try_initialize(source).await {
                Ok(handle) => {
                    let context = handle.context_name().to_string();
                    *self.handle.write().await = Some(handle);
                    self.mark_current(&context);
                    self.set_state(ConnectionState::Connected);
                    info!(%context, "connected to cluster");
                    return true;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "initialization attempt failed");
                    last_error = err;
                    if attempt < INIT_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        *self.handle.write().await = None;
        self.hub
            .publish_error(ErrorRecord::new(operation::INITIALIZATION, &last_error));
        self.set_state(ConnectionState::Disconnected);
        false
    }

    async fn try_initialize(&self, source: &Path) -> Result<Arc<dyn ClusterHandle>, Error> {
        let inventory = match self.backend.discover(source).await {
            Ok(inventory) => inventory,
            Err(err) => {
                warn!("context discovery failed: {err:#}");
                return Err(Error::Configuration {
                    source_name: source.display().to_string(),
                });
            }
        };
        if inventory.contexts.is_empty() {
            return Err(Error::Configuration {
                source_name: source.display().to_string(),
            });
        }

        let candidates = inventory.candidates();
        *self.inventory.lock().expect("inventory lock poisoned") = inventory;

        for candidate in candidates {
            match self.backend.connect(source, &candidate).await {
                Ok(handle) => return Ok(handle),
                // Expected during failover; only the exhausted loop is fatal.
                Err(err) => {
                    debug!(context = %candidate, "context failed validation: {err:#}");
                }
            }
        }

        Err(Error::Configuration {
            source_name: source.display().to_string(),
        })
    }

    /// Validates the requested context and atomically swaps the client
    /// handle on success. A failed switch never touches the working
    /// connection.
    pub async fn switch_context(&self, name: &str) -> bool {
        if self.handle.read().await.is_none() {
            self.hub.publish_error(ErrorRecord::new(
                operation::SWITCH_CONTEXT,
                &Error::NotInitialized,
            ));
            return false;
        }
        let Some(source) = self.source.lock().expect("source lock poisoned").clone() else {
            self.hub.publish_error(ErrorRecord::new(
                operation::SWITCH_CONTEXT,
                &Error::NotInitialized,
            ));
            return false;
        };

        match self.backend.connect(&source, name).await {
            Ok(handle) => {
                *self.handle.write().await = Some(handle);
                self.mark_current(name);
                self.set_state(ConnectionState::Connected);
                info!(context = %name, "switched context");
                true
            }
            Err(err) => {
                self.hub.publish_error(ErrorRecord::new(
                    operation::SWITCH_CONTEXT,
                    &Error::Validation {
                        context: name.to_string(),
                        reason: format!("{err:#}"),
                    },
                ));
                false
            }
        }
    }

    /// Context rows from the last discovery, with `is_current` tracking the
    /// live handle. Empty until initialized.
    pub fn contexts(&self) -> Vec<ClusterContext> {
        let inventory = self.inventory.lock().expect("inventory lock poisoned");
        if self.state() == ConnectionState::Disconnected {
            return Vec::new();
        }
        inventory.contexts.clone()
    }

    /// The validated client handle, shared with forward sessions.
    pub async fn current_handle(&self) -> Result<Arc<dyn ClusterHandle>, Error> {
        self.handle.read().await.clone().ok_or(Error::NotInitialized)
    }

    pub async fn list_namespaces(&self) -> Vec<NamespaceSummary> {
        let handle = match self.current_handle().await {
            Ok(handle) => handle,
            Err(err) => {
                self.hub
                    .publish_error(ErrorRecord::new(operation::GET_NAMESPACES, &err));
                return Vec::new();
            }
        };
        match handle.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(err) => {
                self.hub.publish_error(ErrorRecord::from_message(
                    operation::GET_NAMESPACES,
                    format!("{err:#}"),
                ));
                Vec::new()
            }
        }
    }

    pub async fn list_pods(&self, namespace: &str) -> Vec<PodSummary> {
        let handle = match self.current_handle().await {
            Ok(handle) => handle,
            Err(err) => {
                self.hub
                    .publish_error(ErrorRecord::new(operation::GET_PODS, &err));
                return Vec::new();
            }
        };
        match handle.list_pods(namespace).await {
            Ok(pods) => pods,
            Err(err) => {
                self.hub.publish_error(ErrorRecord::from_message(
                    operation::GET_PODS,
                    format!("{err:#}"),
                ));
                Vec::new()
            }
        }
    }

    /// Ports a forward can target on the pod: ports exposed through services
    /// whose selector matches the pod's labels (stable across pod restarts),
    /// unioned with the raw container ports.
    pub async fn get_ports_for_pod(&self, namespace: &str, pod_name: &str) -> Vec<PortDescriptor> {
        let handle = match self.current_handle().await {
            Ok(handle) => handle,
            Err(err) => {
                self.hub
                    .publish_error(ErrorRecord::new(operation::GET_POD_PORTS, &err));
                return Vec::new();
            }
        };

        let pod = match handle.get_pod(namespace, pod_name).await {
            Ok(pod) => pod,
            Err(err) => {
                self.hub.publish_error(ErrorRecord::from_message(
                    operation::GET_POD_PORTS,
                    format!("{err:#}"),
                ));
                return Vec::new();
            }
        };
        let services = match handle.list_services(namespace).await {
            Ok(services) => services,
            Err(err) => {
                self.hub.publish_error(ErrorRecord::from_message(
                    operation::GET_POD_PORTS,
                    format!("{err:#}"),
                ));
                return Vec::new();
            }
        };

        union_ports(&pod, services)
    }

    /// Releases the client handle and drops every subscription.
    pub async fn cleanup(&self) {
        *self.handle.write().await = None;
        *self.inventory.lock().expect("inventory lock poisoned") = ContextInventory::default();
        self.set_state(ConnectionState::Disconnected);
        self.hub.clear();
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        let changed = *state != next;
        *state = next;
        drop(state);
        // Connected is re-announced on context switches, as observers key
        // their refresh off it.
        if changed || next == ConnectionState::Connected {
            self.hub.publish_status(next);
        }
    }

    fn mark_current(&self, context: &str) {
        let mut inventory = self.inventory.lock().expect("inventory lock poisoned");
        inventory.current = Some(context.to_string());
        for entry in &mut inventory.contexts {
            entry.is_current = entry.name == context;
        }
    }
}

fn union_ports(pod: &PodSummary, services: Vec<ServiceSummary>) -> Vec<PortDescriptor> {
    let mut ports: Vec<PortDescriptor> = Vec::new();

    for service in services.iter().filter(|svc| svc.selects(&pod.labels)) {
        for svc_port in &service.ports {
            let target = match &svc_port.target_port {
                Some(TargetPort::Number(port)) => Some(*port),
                Some(TargetPort::Name(name)) => pod
                    .containers
                    .iter()
                    .flat_map(|container| &container.ports)
                    .find(|port| port.name.as_deref() == Some(name.as_str()))
                    .map(|port| port.port),
                // targetPort defaults to the service port itself
                None => Some(svc_port.port),
            };
            let Some(target) = target else {
                debug!(
                    service = %service.name,
                    target = ?svc_port.target_port,
                    "service target port does not resolve to a container port"
                );
                continue;
            };
            if !ports
                .iter()
                .any(|existing| existing.port == target && existing.protocol == svc_port.protocol)
            {
                ports.push(PortDescriptor::service(
                    &service.name,
                    target,
                    Some(&svc_port.protocol),
                    svc_port.name.as_deref(),
                ));
            }
        }
    }

    for container in &pod.containers {
        for port in &container.ports {
            if !ports
                .iter()
                .any(|existing| existing.port == port.port && existing.protocol == port.protocol)
            {
                ports.push(PortDescriptor::container(
                    &container.name,
                    port.port,
                    Some(&port.protocol),
                    port.name.as_deref(),
                ));
            }
        }
    }

    ports
}
