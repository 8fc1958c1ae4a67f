use crate::cluster::ClusterHandle;
use crate::error::{Error, operation};
use crate::events::{ErrorRecord, NotificationHub};
use crate::forward::ForwardSession;
use crate::model::{ForwardSnapshot, ForwardSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// All active forward sessions, keyed by the derived identifier. The whole
/// registry serializes starts and stops behind one lock so the at-most-one
/// session per identifier invariant holds under concurrent requests.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, ForwardSession>>,
    hub: NotificationHub,
}

impl SessionRegistry {
    pub fn new(hub: NotificationHub) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            hub,
        }
    }

    /// Starts a forward for the spec. A spec whose identifier is already
    /// registered is rejected before any cluster call is made.
    pub async fn start_forward(
        &self,
        spec: ForwardSpec,
        handle: Arc<dyn ClusterHandle>,
    ) -> Result<String, Error> {
        let id = spec.id();
        let mut sessions = self.sessions.lock().await;
        Self::prune(&mut sessions).await;

        if sessions.contains_key(&id) {
            let err = Error::DuplicateForward(id);
            self.hub
                .publish_error(ErrorRecord::new(operation::START_PORT_FORWARD, &err));
            return Err(err);
        }

        match ForwardSession::start(spec, handle, self.hub.clone()).await {
            Ok(session) => {
                sessions.insert(id.clone(), session);
                self.publish_snapshot(&sessions);
                Ok(id)
            }
            Err(err) => {
                self.hub
                    .publish_error(ErrorRecord::new(operation::START_PORT_FORWARD, &err));
                Err(err)
            }
        }
    }

    /// Stops and removes one session. Unknown identifiers are a no-op and
    /// return false.
    pub async fn stop_forward(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(mut session) = sessions.remove(id) else {
            debug!(%id, "stop requested for unknown forward");
            return false;
        };
        session.stop().await;
        self.publish_snapshot(&sessions);
        true
    }

    /// Best-effort drain: every session is stopped and the registry is left
    /// empty, whatever individual stops report.
    pub async fn stop_all(&self) -> bool {
        let mut sessions = self.sessions.lock().await;
        let drained = sessions.drain().collect::<Vec<_>>();
        let count = drained.len();
        for (id, mut session) in drained {
            session.stop().await;
            debug!(%id, "forward stopped during drain");
        }
        if count > 0 {
            info!(count, "stopped all forward sessions");
        }
        self.publish_snapshot(&sessions);
        true
    }

    pub async fn list(&self) -> Vec<ForwardSnapshot> {
        let mut sessions = self.sessions.lock().await;
        if Self::prune(&mut sessions).await {
            self.publish_snapshot(&sessions);
        }
        Self::snapshot(&sessions)
    }

    /// Sessions whose listener died are already inactive; they leave the
    /// registry the next time it is touched.
    async fn prune(sessions: &mut HashMap<String, ForwardSession>) -> bool {
        let dead = sessions
            .iter()
            .filter(|(_, session)| !session.is_active())
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in &dead {
            if let Some(mut session) = sessions.remove(id) {
                session.stop().await;
                debug!(%id, "pruned inactive forward");
            }
        }
        !dead.is_empty()
    }

    fn snapshot(sessions: &HashMap<String, ForwardSession>) -> Vec<ForwardSnapshot> {
        let mut rows = sessions
            .values()
            .map(ForwardSession::snapshot)
            .collect::<Vec<_>>();
        rows.sort_by(|left, right| left.id.cmp(&right.id));
        rows
    }

    fn publish_snapshot(&self, sessions: &HashMap<String, ForwardSession>) {
        self.hub.publish_forwards(Self::snapshot(sessions));
    }
}
