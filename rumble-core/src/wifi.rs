//! Link-layer adapters. Wifi = TCP server for Rumble plus the beacon scanner.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::config::NetworkConfig;
use crate::events::{EventSink, NetworkEvent};
use crate::identity::NodeId;
use crate::link::{LinkLayerError, LinkLayerKind};
use crate::scanner::{BeaconScanner, Scanner};
use crate::tcp::{ConnectionHandler, TcpServerWorker};
use crate::worker::{Worker, WorkerPool};

#[async_trait]
pub trait LinkLayerAdapter: Send + Sync {
    fn link_layer_kind(&self) -> LinkLayerKind;

    async fn start(&self) -> Result<(), LinkLayerError>;

    /// Stop scanning and every worker of this link layer.
    fn stop(&self);

    fn is_activated(&self) -> bool;
}

struct Running {
    server: Arc<TcpServerWorker>,
    scanner: BeaconScanner,
}

pub struct WifiLinkLayer {
    config: NetworkConfig,
    node_id: NodeId,
    workers: Arc<WorkerPool>,
    on_accept: ConnectionHandler,
    events: EventSink,
    running: Mutex<Option<Running>>,
}

impl WifiLinkLayer {
    pub fn new(
        config: NetworkConfig,
        node_id: NodeId,
        workers: Arc<WorkerPool>,
        on_accept: ConnectionHandler,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            node_id,
            workers,
            on_accept,
            events,
            running: Mutex::new(None),
        }
    }

    /// Address the TCP server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.server.local_addr())
    }
}

#[async_trait]
impl LinkLayerAdapter for WifiLinkLayer {
    fn link_layer_kind(&self) -> LinkLayerKind {
        LinkLayerKind::Wifi
    }

    async fn start(&self) -> Result<(), LinkLayerError> {
        if self.is_activated() {
            return Ok(());
        }
        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.tcp_port));
        let server = Arc::new(TcpServerWorker::bind(bind, self.on_accept.clone()).await?);
        let port = server.local_addr().port();
        self.workers.add_worker(server.clone());

        let scanner = BeaconScanner::new(&self.config, self.node_id, port, self.events.clone());
        if let Err(e) = scanner.start_scanning().await {
            server.stop_worker();
            return Err(e);
        }

        *self.running.lock() = Some(Running { server, scanner });
        info!(port, "wifi link layer started");
        self.events.emit(NetworkEvent::LinkLayerStarted(LinkLayerKind::Wifi));
        Ok(())
    }

    fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.scanner.stop_scanning();
        running.server.stop_worker();
        self.workers.stop_link_layer(LinkLayerKind::Wifi);
        info!("wifi link layer stopped");
        self.events.emit(NetworkEvent::LinkLayerStopped(LinkLayerKind::Wifi));
    }

    fn is_activated(&self) -> bool {
        self.running.lock().is_some()
    }
}
