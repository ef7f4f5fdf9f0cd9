//! Workers: units of execution that own a connection (or a listening socket)
//! until it ends or is stopped, and the pool that runs them.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::link::{LinkLayerError, LinkLayerKind};
use crate::protocol::ProtocolKind;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    LinkLayer(#[from] LinkLayerError),
    #[error("worker {0} was already started")]
    AlreadyStarted(String),
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn worker_id(&self) -> String;

    fn link_layer_kind(&self) -> LinkLayerKind;

    fn protocol_kind(&self) -> ProtocolKind;

    /// Run until the connection ends or `stop_worker` is called.
    async fn start_worker(&self) -> Result<(), WorkerError>;

    /// Ask a running worker to finish. Idempotent; safe before start.
    fn stop_worker(&self);

    fn is_working(&self) -> bool;
}

/// Resolves once the stop flag is raised (or its sender is gone).
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop || rx.changed().await.is_err() {
            return;
        }
    }
}

type WorkerMap = Arc<Mutex<HashMap<String, Arc<dyn Worker>>>>;

/// Spawns workers on the runtime and tracks the live ones by id.
#[derive(Default)]
pub struct WorkerPool {
    workers: WorkerMap,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `worker`. Returns false (and does not spawn) if a worker with the
    /// same id is already live.
    pub fn add_worker<W: Worker + 'static>(&self, worker: Arc<W>) -> bool {
        let id = worker.worker_id();
        let worker: Arc<dyn Worker> = worker;
        {
            let mut workers = self.workers.lock();
            if workers.contains_key(&id) {
                return false;
            }
            workers.insert(id.clone(), worker.clone());
        }
        let workers = self.workers.clone();
        tokio::spawn(async move {
            match worker.start_worker().await {
                Ok(()) => debug!(worker = %id, "worker finished"),
                Err(e) => warn!(worker = %id, error = %e, "worker failed"),
            }
            workers.lock().remove(&id);
        });
        true
    }

    pub fn stop_worker(&self, id: &str) -> bool {
        let worker = self.workers.lock().get(id).cloned();
        match worker {
            Some(w) => {
                w.stop_worker();
                true
            }
            None => false,
        }
    }

    pub fn stop_link_layer(&self, kind: LinkLayerKind) {
        let workers: Vec<_> = self
            .workers
            .lock()
            .values()
            .filter(|w| w.link_layer_kind() == kind)
            .cloned()
            .collect();
        for w in workers {
            w.stop_worker();
        }
    }

    pub fn stop_all(&self) {
        let workers: Vec<_> = self.workers.lock().values().cloned().collect();
        for w in workers {
            w.stop_worker();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
