//! Cluster connection management and local TCP tunnels to pods.
//!
//! [`ConnectionManager`] discovers kubeconfig contexts, validates them against
//! the live API with failover and bounded retry, and answers namespace/pod/port
//! queries. [`SessionRegistry`] opens local listening sockets and relays every
//! accepted client connection onto its own remote forwarding channel. A UI or
//! IPC shell consumes both through [`NotificationHub`] subscriptions.

pub mod bridge;
pub mod cluster;
pub mod connection;
pub mod error;
pub mod events;
pub mod forward;
pub mod k8s;
pub mod model;
pub mod registry;

#[cfg(test)]
pub(crate) mod testsupport;

pub use connection::ConnectionManager;
pub use error::Error;
pub use events::{ErrorRecord, Notification, NotificationHub, Subscription};
pub use k8s::KubeBackend;
pub use model::{
    ClusterContext, ConnectionState, ForwardSnapshot, ForwardSpec, PortDescriptor,
};
pub use registry::SessionRegistry;
