use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ClusterContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContextInventory {
    pub contexts: Vec<ClusterContext>,
    pub current: Option<String>,
}

impl ContextInventory {
    /// Probe order: the designated current context first, then the rest in
    /// their listed order.
    pub fn candidates(&self) -> Vec<String> {
        let mut ordered = Vec::with_capacity(self.contexts.len());
        if let Some(current) = self.current.as_ref()
            && self.contexts.iter().any(|ctx| &ctx.name == current)
        {
            ordered.push(current.clone());
        }
        for ctx in &self.contexts {
            if Some(&ctx.name) != self.current.as_ref() {
                ordered.push(ctx.name.clone());
            }
        }
        ordered
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct NamespaceSummary {
    pub name: String,
    pub phase: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ContainerPortSummary {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub name: String,
    pub image: String,
    pub ports: Vec<ContainerPortSummary>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub ready: bool,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerSummary>,
    pub created: Option<DateTime<Utc>>,
}

impl PodSummary {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServicePortSummary {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: Option<TargetPort>,
    pub protocol: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePortSummary>,
}

impl ServiceSummary {
    /// Label-selector semantics: every selector pair must be present on the
    /// pod; an empty selector selects nothing.
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.selector.is_empty()
            && self
                .selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSource {
    Container,
    Service,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PortDescriptor {
    pub owner: String,
    pub port: u16,
    pub protocol: String,
    pub display: String,
    pub source: PortSource,
}

impl PortDescriptor {
    pub fn container(owner: &str, port: u16, protocol: Option<&str>, name: Option<&str>) -> Self {
        let protocol = protocol.unwrap_or("TCP").to_string();
        let display = match name {
            Some(name) => format!("{owner}:{name} {port}/{protocol}"),
            None => format!("{owner} {port}/{protocol}"),
        };
        Self {
            owner: owner.to_string(),
            port,
            protocol,
            display,
            source: PortSource::Container,
        }
    }

    pub fn service(owner: &str, port: u16, protocol: Option<&str>, name: Option<&str>) -> Self {
        let protocol = protocol.unwrap_or("TCP").to_string();
        let display = match name {
            Some(name) => format!("svc/{owner}:{name} {port}/{protocol}"),
            None => format!("svc/{owner} {port}/{protocol}"),
        };
        Self {
            owner: owner.to_string(),
            port,
            protocol,
            display,
            source: PortSource::Service,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct ForwardSpec {
    pub namespace: String,
    pub pod: String,
    pub local_port: u16,
    pub remote_port: u16,
}

impl ForwardSpec {
    pub fn new(namespace: &str, pod: &str, local_port: u16, remote_port: u16) -> Self {
        Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            local_port,
            remote_port,
        }
    }

    /// Derived identifier; unique among active sessions.
    pub fn id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.namespace, self.pod, self.local_port, self.remote_port
        )
    }
}

impl Display for ForwardSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {}:{}",
            self.namespace, self.pod, self.local_port, self.remote_port
        )
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ForwardSnapshot {
    pub id: String,
    pub spec: ForwardSpec,
    pub active: bool,
    pub context: String,
}
