//! Wires the core, sockets and tasks together and exposes the queue-based front-end contract.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use slcp_core::{Action, ChatCore, Event, PeerRecord, Request, SessionState};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::{discovery, transport};

/// Registry and session state: the only state shared between tasks.
pub type SharedCore = Arc<Mutex<ChatCore>>;

pub type ActionSender = mpsc::UnboundedSender<Action>;

/// Engine settings resolved from the node config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub handle: String,
    pub port: u16,
    pub whois_port: u16,
    pub autoreply: Option<String>,
    pub own_ip: IpAddr,
}

impl EngineConfig {
    pub fn from_config(cfg: &Config, own_ip: IpAddr) -> Self {
        Self {
            handle: cfg.handle.clone(),
            port: cfg.port,
            whois_port: cfg.whoisport,
            autoreply: cfg.autoreply.clone(),
            own_ip,
        }
    }
}

/// Front-end side of a running engine.
pub struct EngineHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: mpsc::UnboundedReceiver<Event>,
    core: SharedCore,
    shutdown: watch::Sender<bool>,
    request_task: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    local_port: u16,
}

impl EngineHandle {
    /// Queue a request. Returns false once the engine has stopped.
    pub fn send(&self, req: Request) -> bool {
        self.requests.send(req).is_ok()
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.core.lock().await.peers()
    }

    pub async fn is_joined(&self) -> bool {
        self.core.lock().await.is_joined()
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Finish queued requests, then signal every task and wait for them.
    /// Sockets close as the tasks drop them.
    pub async fn shutdown(self) {
        drop(self.requests);
        let _ = self.request_task.await;
        let _ = self.shutdown.send(true);
        for t in self.tasks {
            let _ = t.await;
        }
        tracing::info!("engine stopped");
    }
}

/// Bind all sockets and spawn the engine tasks. Must run inside a tokio runtime.
pub async fn start(cfg: EngineConfig) -> io::Result<EngineHandle> {
    let (control, listener) = transport::bind_control(cfg.port).await?;
    let local_port = listener.local_addr()?.port();
    let discovery_socket = discovery::make_discovery_socket(cfg.whois_port).await?;
    tracing::info!(
        handle = %cfg.handle,
        port = local_port,
        whois_port = cfg.whois_port,
        own_ip = %cfg.own_ip,
        "engine listening"
    );

    let session = SessionState::new(cfg.handle, local_port)
        .with_autoreply(cfg.autoreply)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let core: SharedCore = Arc::new(Mutex::new(ChatCore::new(session, cfg.own_ip)));

    let control = Arc::new(control);
    let discovery_socket = Arc::new(discovery_socket);
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let request_task = tokio::spawn(run_requests(request_rx, core.clone(), action_tx.clone()));
    let tasks = vec![
        tokio::spawn(transport::run_udp(
            control.clone(),
            core.clone(),
            action_tx.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(transport::run_tcp(
            listener,
            core.clone(),
            action_tx.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(discovery::run_discovery(
            discovery_socket.clone(),
            core.clone(),
            action_tx,
            shutdown_rx.clone(),
        )),
        tokio::spawn(transport::run_dispatcher(
            transport::Outbound {
                control,
                discovery: discovery_socket,
                whois_port: cfg.whois_port,
            },
            action_rx,
            event_tx,
            shutdown_rx,
        )),
    ];

    Ok(EngineHandle {
        requests: request_tx,
        events: event_rx,
        core,
        shutdown: shutdown_tx,
        request_task,
        tasks,
        local_port,
    })
}

/// Front-end requests until the handle is dropped. Rejected ones come back as `Event::Failed`.
async fn run_requests(
    mut requests: mpsc::UnboundedReceiver<Request>,
    core: SharedCore,
    actions: ActionSender,
) {
    while let Some(req) = requests.recv().await {
        let result = core.lock().await.handle_request(req);
        match result {
            Ok(list) => forward(&actions, list),
            Err(e) => {
                tracing::warn!("request rejected: {}", e);
                let _ = actions.send(Action::Deliver(Event::Failed(e)));
            }
        }
    }
    tracing::debug!("request loop stopped");
}

/// Decode and apply one datagram; protocol errors are logged and the datagram dropped.
pub async fn route_datagram(
    core: &SharedCore,
    actions: &ActionSender,
    from: SocketAddr,
    bytes: &[u8],
    channel: &'static str,
) {
    let result = core.lock().await.on_datagram(from, bytes);
    match result {
        Ok(list) => {
            tracing::debug!(%from, channel, actions = list.len(), "datagram");
            forward(actions, list);
        }
        Err(e) => tracing::warn!(%from, channel, "dropping datagram: {}", e),
    }
}

pub fn forward(actions: &ActionSender, list: Vec<Action>) {
    for a in list {
        let _ = actions.send(a);
    }
}
