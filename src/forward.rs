use crate::bridge::{self, BridgeEnd};
use crate::cluster::ClusterHandle;
use crate::error::{Error, operation};
use crate::events::{ErrorRecord, NotificationHub};
use crate::model::{ForwardSnapshot, ForwardSpec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// One local listening socket tunnelled to one (namespace, pod, remote port)
/// target. Every accepted client connection gets its own remote channel and
/// its own bridge; clients are fully independent of each other.
pub struct ForwardSession {
    id: String,
    spec: ForwardSpec,
    context: String,
    local_addr: SocketAddr,
    active: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl ForwardSession {
    pub async fn start(
        spec: ForwardSpec,
        handle: Arc<dyn ClusterHandle>,
        hub: NotificationHub,
    ) -> Result<Self, Error> {
        let pod = handle
            .get_pod(&spec.namespace, &spec.pod)
            .await
            .map_err(|err| Error::remote_channel(format!("{err:#}")))?;
        if !pod.is_running() {
            return Err(Error::PodNotRunning {
                namespace: spec.namespace.clone(),
                pod: spec.pod.clone(),
                phase: pod.phase,
            });
        }

        let listener = TcpListener::bind(("127.0.0.1", spec.local_port))
            .await
            .map_err(|source| Error::LocalBind {
                port: spec.local_port,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| Error::LocalBind {
            port: spec.local_port,
            source,
        })?;

        info!(forward = %spec, %local_addr, "forward session listening");

        let context = handle.context_name().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active = Arc::new(AtomicBool::new(true));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            spec.clone(),
            handle,
            hub,
            shutdown_rx,
            Arc::clone(&active),
        ));

        Ok(Self {
            id: spec.id(),
            spec,
            context,
            local_addr,
            active,
            shutdown: shutdown_tx,
            accept_task: Some(accept_task),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec(&self) -> &ForwardSpec {
        &self.spec
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ForwardSnapshot {
        ForwardSnapshot {
            id: self.id.clone(),
            spec: self.spec.clone(),
            active: self.is_active(),
            context: self.context.clone(),
        }
    }

    /// Closes the listening socket and tears down every in-flight bridge.
    /// Safe to call any number of times.
    pub async fn stop(&mut self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        if was_active {
            info!(forward = %self.spec, "forward session stopped");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    spec: ForwardSpec,
    handle: Arc<dyn ClusterHandle>,
    hub: NotificationHub,
    mut shutdown: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(forward = %spec, %peer, "accepted local client");
                    connections.spawn(handle_client(
                        socket,
                        spec.clone(),
                        Arc::clone(&handle),
                        hub.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    warn!(forward = %spec, error = %err, "local listener failed, closing session");
                    active.store(false, Ordering::SeqCst);
                    hub.publish_error(ErrorRecord::from_message(
                        operation::START_PORT_FORWARD,
                        format!("local listener for {spec} failed: {err}"),
                    ));
                    break;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = bridge::wait_for_shutdown(&mut shutdown) => break,
        }
    }
    drop(listener);
    connections.shutdown().await;
}

async fn handle_client(
    socket: TcpStream,
    spec: ForwardSpec,
    handle: Arc<dyn ClusterHandle>,
    hub: NotificationHub,
    shutdown: watch::Receiver<bool>,
) {
    let channel = match handle
        .open_channel(&spec.namespace, &spec.pod, spec.remote_port)
        .await
    {
        Ok(channel) => channel,
        // Only this client's socket closes; the session keeps accepting.
        Err(err) => {
            hub.publish_error(ErrorRecord::new(
                operation::START_PORT_FORWARD,
                &Error::remote_channel(format!("{err:#}")),
            ));
            return;
        }
    };

    let outcome = bridge::bridge(socket, channel, shutdown).await;
    match outcome.ended {
        BridgeEnd::Error(detail) => {
            debug!(forward = %spec, %detail, "bridge ended with error");
        }
        ended => {
            debug!(forward = %spec, ?ended, bytes = outcome.stats.total(), "bridge closed");
        }
    }
}
