//! Host-driven API: ChatCore receives datagrams, stream headers and front-end requests,
//! returns actions (network sends and front-end events). No I/O happens here.

use std::net::{IpAddr, SocketAddr};

use crate::protocol::{Command, ImageHeader, Message, AUTOREPLY_PREFIX};
use crate::registry::{PeerRecord, PeerRegistry};
use crate::session::SessionState;
use crate::wire::{self, ProtocolError};

/// Outbound item from the front end.
#[derive(Debug, Clone)]
pub enum Request {
    /// JOIN or LEAVE, announced to the whole network.
    Broadcast(Message),
    DirectText {
        to: String,
        text: String,
    },
    DirectImage {
        to: String,
        bytes: Vec<u8>,
        comment: String,
    },
    Whois {
        handle: String,
    },
    /// `None` or blank text disables the autoreply.
    SetAutoreply(Option<String>),
}

/// Inbound item for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Text {
        from: String,
        text: String,
    },
    /// `incomplete` is set when the connection closed before the declared size was reached.
    Image {
        from: String,
        bytes: Vec<u8>,
        comment: String,
        incomplete: Option<ChatError>,
    },
    PeerDiscovered {
        handle: String,
        addr: SocketAddr,
    },
    PeerLeft {
        handle: String,
    },
    /// A request was rejected or could not be carried out.
    Failed(ChatError),
}

/// What the host must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// UDP unicast from the control socket.
    SendDirect { to: SocketAddr, line: String },
    /// UDP broadcast to every node on the shared discovery port.
    Broadcast { line: String },
    /// New TCP connection: header line, raw bytes, close.
    SendImage {
        to: SocketAddr,
        header: String,
        bytes: Vec<u8>,
    },
    Deliver(Event),
}

/// First line read from an inbound TCP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamHeader {
    /// Read exactly `header.size` bytes next.
    Image { sender: String, header: ImageHeader },
    /// A text message sent over TCP; already handled.
    Text(Vec<Action>),
}

/// Discovery engine and routing policy for one local node.
pub struct ChatCore {
    session: SessionState,
    registry: PeerRegistry,
    own_ip: IpAddr,
}

impl ChatCore {
    pub fn new(session: SessionState, own_ip: IpAddr) -> Self {
        Self {
            session,
            registry: PeerRegistry::new(),
            own_ip,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.registry.snapshot()
    }

    pub fn is_joined(&self) -> bool {
        self.session.is_joined()
    }

    /// Process a front-end request. Errors are for the caller to report; state is untouched on error.
    pub fn handle_request(&mut self, req: Request) -> Result<Vec<Action>, ChatError> {
        match req {
            Request::Broadcast(msg) => {
                if !msg.command.is_broadcast() {
                    return Err(ChatError::NotBroadcast(msg.command));
                }
                let line = wire::encode(&msg)?;
                if msg.command == Command::Join {
                    self.session.join();
                } else {
                    self.session.leave();
                }
                Ok(vec![Action::Broadcast { line }])
            }
            Request::DirectText { to, text } => {
                self.require_joined()?;
                let addr = self.lookup(&to)?;
                let line = wire::encode(&Message::msg(&self.session.local_handle, &text))?;
                Ok(vec![Action::SendDirect { to: addr, line }])
            }
            Request::DirectImage { to, bytes, comment } => {
                self.require_joined()?;
                let addr = self.lookup(&to)?;
                let header = wire::encode(&Message::img(
                    &self.session.local_handle,
                    bytes.len(),
                    &comment,
                ))?;
                Ok(vec![Action::SendImage {
                    to: addr,
                    header,
                    bytes,
                }])
            }
            Request::Whois { handle } => {
                self.require_joined()?;
                let line = wire::encode(&Message::whois(
                    &handle,
                    self.session.local_port,
                    Some(&self.session.local_handle),
                ))?;
                Ok(vec![Action::Broadcast { line }])
            }
            Request::SetAutoreply(text) => {
                self.session.set_autoreply(text)?;
                Ok(Vec::new())
            }
        }
    }

    /// Process one UDP datagram from either the control or the discovery socket.
    pub fn on_datagram(
        &mut self,
        from: SocketAddr,
        bytes: &[u8],
    ) -> Result<Vec<Action>, ProtocolError> {
        let msg = wire::decode_bytes(bytes)?;
        self.on_message(from, &msg)
    }

    pub fn on_message(
        &mut self,
        from: SocketAddr,
        msg: &Message,
    ) -> Result<Vec<Action>, ProtocolError> {
        match msg.command {
            Command::Join => self.on_join(from, msg),
            Command::Leave => self.on_leave(msg),
            Command::Whois => self.on_whois(from, msg),
            Command::Iam => self.on_iam(msg),
            Command::Msg => {
                let sender = msg.param(0)?;
                let text = msg.param(1)?;
                if self.session.is_local(sender) {
                    return Ok(Vec::new());
                }
                // Datagrams leave from the sender's control socket, so the source is its listen address.
                self.registry.upsert(sender, from);
                self.on_text(sender, text)
            }
            // Image payloads only travel over TCP.
            Command::Img => Err(ProtocolError::UnexpectedCommand(Command::Img)),
        }
    }

    /// Interpret the header line of an inbound TCP connection.
    pub fn on_stream_header(&mut self, bytes: &[u8]) -> Result<StreamHeader, ProtocolError> {
        let msg = wire::decode_bytes(bytes)?;
        match msg.command {
            Command::Img => {
                let sender = msg.param(0)?.to_string();
                let header = ImageHeader::parse(msg.opt_param(1).unwrap_or("0"))?;
                Ok(StreamHeader::Image { sender, header })
            }
            Command::Msg => {
                let sender = msg.param(0)?;
                let text = msg.param(1)?;
                if self.session.is_local(sender) {
                    return Ok(StreamHeader::Text(Vec::new()));
                }
                Ok(StreamHeader::Text(self.on_text(sender, text)?))
            }
            other => Err(ProtocolError::UnexpectedCommand(other)),
        }
    }

    /// Image payload finished (or connection closed early). Always delivered, flagged when short.
    pub fn on_image(&self, sender: String, header: ImageHeader, bytes: Vec<u8>) -> Vec<Action> {
        let incomplete = (bytes.len() < header.size).then(|| ChatError::PartialTransfer {
            expected: header.size,
            received: bytes.len(),
        });
        vec![Action::Deliver(Event::Image {
            from: sender,
            bytes,
            comment: header.comment,
            incomplete,
        })]
    }

    fn on_join(&mut self, from: SocketAddr, msg: &Message) -> Result<Vec<Action>, ProtocolError> {
        let handle = msg.param(0)?;
        let port = msg.port_param(1)?;
        if self.session.is_local(handle) {
            return Ok(Vec::new());
        }
        let addr = SocketAddr::new(from.ip(), port);
        self.registry.upsert(handle, addr);
        Ok(vec![Action::Deliver(Event::PeerDiscovered {
            handle: handle.to_string(),
            addr,
        })])
    }

    fn on_leave(&mut self, msg: &Message) -> Result<Vec<Action>, ProtocolError> {
        let handle = msg.param(0)?;
        if self.session.is_local(handle) || !self.registry.mark_offline(handle) {
            return Ok(Vec::new());
        }
        Ok(vec![Action::Deliver(Event::PeerLeft {
            handle: handle.to_string(),
        })])
    }

    fn on_whois(&mut self, from: SocketAddr, msg: &Message) -> Result<Vec<Action>, ProtocolError> {
        let target = msg.param(0)?;
        let reply_to = SocketAddr::new(from.ip(), msg.port_param(1)?);
        let requester = msg.opt_param(2);

        if let Some(r) = requester {
            if self.session.is_local(r) {
                return Ok(Vec::new());
            }
            self.registry.upsert(r, reply_to);
        }
        if !self.session.is_local(target) {
            return Ok(Vec::new());
        }

        if self.session.is_joined() {
            let iam = Message::iam(
                &self.session.local_handle,
                self.own_ip,
                self.session.local_port,
            );
            return Ok(vec![Action::Broadcast {
                line: wire::encode(&iam)?,
            }]);
        }
        match self.session.autoreply_text() {
            Some(text) => {
                let line = wire::encode(&Message::msg(&self.session.local_handle, &text))?;
                Ok(vec![Action::SendDirect { to: reply_to, line }])
            }
            None => Ok(Vec::new()),
        }
    }

    fn on_iam(&mut self, msg: &Message) -> Result<Vec<Action>, ProtocolError> {
        let handle = msg.param(0)?;
        let ip = msg.ip_param(1)?;
        let port = msg.port_param(2)?;
        // Our own broadcast IAM comes back to us.
        if self.session.is_local(handle) {
            return Ok(Vec::new());
        }
        let addr = SocketAddr::new(ip, port);
        self.registry.upsert(handle, addr);
        Ok(vec![Action::Deliver(Event::PeerDiscovered {
            handle: handle.to_string(),
            addr,
        })])
    }

    /// Joined: deliver. Unjoined: suppress and answer with the autoreply, if any.
    fn on_text(&mut self, sender: &str, text: &str) -> Result<Vec<Action>, ProtocolError> {
        if self.session.is_joined() {
            return Ok(vec![Action::Deliver(Event::Text {
                from: sender.to_string(),
                text: text.to_string(),
            })]);
        }
        // Never answer an autoreply with an autoreply.
        if text.starts_with(AUTOREPLY_PREFIX) || self.session.is_local(sender) {
            return Ok(Vec::new());
        }
        let (Some(reply), Some(to)) = (
            self.session.autoreply_text(),
            self.registry.addr_of(sender),
        ) else {
            return Ok(Vec::new());
        };
        let line = wire::encode(&Message::msg(&self.session.local_handle, &reply))?;
        Ok(vec![Action::SendDirect { to, line }])
    }

    fn require_joined(&self) -> Result<(), ChatError> {
        if self.session.is_joined() {
            Ok(())
        } else {
            Err(ChatError::NotJoined)
        }
    }

    fn lookup(&self, handle: &str) -> Result<SocketAddr, ChatError> {
        self.registry
            .addr_of(handle)
            .ok_or_else(|| ChatError::UnknownPeer(handle.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("not joined")]
    NotJoined,
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("{0} cannot be broadcast")]
    NotBroadcast(Command),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("transfer incomplete: received {received} of {expected} bytes")]
    PartialTransfer { expected: usize, received: usize },
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}
