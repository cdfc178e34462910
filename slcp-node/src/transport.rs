//! Direct transport: UDP control socket and TCP image listener on the node's own port,
//! plus the outbound dispatcher that turns core actions into socket writes.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use slcp_core::{Action, ChatError, Event, StreamHeader, MAX_MESSAGE_LEN};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};

use crate::discovery;
use crate::engine::{self, ActionSender, SharedCore};

const RECV_BUF: usize = 2048;

/// Cap on up-front allocation for an image; larger payloads grow as they arrive.
const MAX_PREALLOC: usize = 1024 * 1024;

/// Bind UDP and TCP to the same port. Port 0 picks a free TCP port and reuses it for UDP.
pub async fn bind_control(port: u16) -> io::Result<(UdpSocket, TcpListener)> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    let port = listener.local_addr()?.port();
    let udp = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    Ok((udp, listener))
}

/// Inbound control datagrams (MSG, plus any discovery command sent directly).
pub async fn run_udp(
    socket: Arc<UdpSocket>,
    core: SharedCore,
    actions: ActionSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUF];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            r = socket.recv_from(&mut buf) => match r {
                Ok((n, from)) => {
                    engine::route_datagram(&core, &actions, from, &buf[..n], "control").await;
                }
                Err(e) => tracing::warn!("control recv failed: {}", e),
            },
        }
    }
    tracing::debug!("control loop stopped");
}

/// Accept loop: one task per connection, no limit. Shutdown aborts in-flight transfers.
pub async fn run_tcp(
    listener: TcpListener,
    core: SharedCore,
    actions: ActionSender,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            r = listener.accept() => match r {
                Ok((stream, peer)) => {
                    let core = core.clone();
                    let actions = actions.clone();
                    let mut stop = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = stop.changed() => {
                                tracing::debug!(%peer, "transfer aborted by shutdown");
                            }
                            r = handle_connection(stream, peer, &core, &actions) => {
                                if let Err(e) = r {
                                    tracing::warn!(%peer, "tcp connection failed: {}", e);
                                }
                            }
                        }
                    });
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            },
        }
    }
    tracing::debug!("tcp accept loop stopped");
}

/// Read one header line, then the declared number of image bytes.
/// An early close still delivers what arrived, flagged as incomplete.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    core: &SharedCore,
    actions: &ActionSender,
) -> Result<(), ChatError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    (&mut reader)
        .take(MAX_MESSAGE_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if line.is_empty() {
        return Err(ChatError::Transport("connection closed before header".into()));
    }

    let header = core.lock().await.on_stream_header(&line)?;
    let (sender, header) = match header {
        StreamHeader::Text(list) => {
            engine::forward(actions, list);
            return Ok(());
        }
        StreamHeader::Image { sender, header } => (sender, header),
    };

    let mut bytes = Vec::with_capacity(header.size.min(MAX_PREALLOC));
    if let Err(e) = (&mut reader)
        .take(header.size as u64)
        .read_to_end(&mut bytes)
        .await
    {
        tracing::warn!(%peer, "image stream broken: {}", e);
    }
    if bytes.len() < header.size {
        tracing::warn!(
            %peer,
            sender = %sender,
            expected = header.size,
            received = bytes.len(),
            "image transfer incomplete"
        );
    } else {
        tracing::info!(%peer, sender = %sender, size = bytes.len(), "image received");
    }
    let list = core.lock().await.on_image(sender, header, bytes);
    engine::forward(actions, list);
    Ok(())
}

/// Open a connection, send the IMG header, stream the bytes, close.
pub async fn send_image(to: SocketAddr, header: &str, bytes: &[u8]) -> io::Result<()> {
    let mut stream = TcpStream::connect(to).await?;
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Sockets used for outbound traffic.
pub struct Outbound {
    pub control: Arc<UdpSocket>,
    pub discovery: Arc<UdpSocket>,
    pub whois_port: u16,
}

/// Performs actions in arrival order; images go out on their own tasks.
/// Queued actions are drained before shutdown is honoured.
pub async fn run_dispatcher(
    out: Outbound,
    mut actions: mpsc::UnboundedReceiver<Action>,
    events: mpsc::UnboundedSender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let action = tokio::select! {
            biased;
            a = actions.recv() => match a {
                Some(a) => a,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        match action {
            Action::Deliver(ev) => {
                let _ = events.send(ev);
            }
            Action::SendDirect { to, line } => {
                match out.control.send_to(line.as_bytes(), to).await {
                    Ok(_) => tracing::debug!(%to, line = line.trim_end(), "sent"),
                    Err(e) => {
                        tracing::warn!(%to, "udp send failed: {}", e);
                        let _ = events.send(Event::Failed(e.into()));
                    }
                }
            }
            Action::Broadcast { line } => {
                match discovery::send_broadcast(&out.discovery, &line, out.whois_port).await {
                    Ok(dest) => tracing::debug!(%dest, line = line.trim_end(), "broadcast"),
                    Err(e) => {
                        tracing::warn!("broadcast failed: {}", e);
                        let _ = events.send(Event::Failed(e.into()));
                    }
                }
            }
            Action::SendImage { to, header, bytes } => {
                let events = events.clone();
                tokio::spawn(async move {
                    match send_image(to, &header, &bytes).await {
                        Ok(()) => tracing::info!(%to, size = bytes.len(), "image sent"),
                        Err(e) => {
                            tracing::warn!(%to, "image send failed: {}", e);
                            let _ = events.send(Event::Failed(e.into()));
                        }
                    }
                });
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use slcp_core::{ChatCore, Message, SessionState};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn core(joined: bool) -> SharedCore {
        let mut c = ChatCore::new(
            SessionState::new("bob", 5001),
            "127.0.0.1".parse().unwrap(),
        );
        if joined {
            c.handle_request(slcp_core::Request::Broadcast(Message::join("bob", 5001)))
                .unwrap();
        }
        Arc::new(Mutex::new(c))
    }

    fn payload(n: usize) -> Vec<u8> {
        let mut v = vec![0u8; n];
        rand::thread_rng().fill_bytes(&mut v);
        v
    }

    async fn next_action(rx: &mut mpsc::UnboundedReceiver<Action>) -> Action {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    /// Listener that hands every accepted connection to `handle_connection`.
    async fn receiver(core: SharedCore) -> (SocketAddr, mpsc::UnboundedReceiver<Action>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let core = core.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, peer, &core, &tx).await;
                });
            }
        });
        (addr, rx)
    }

    #[tokio::test]
    async fn full_image_transfer() {
        let (addr, mut rx) = receiver(core(true)).await;
        let data = payload(42);
        send_image(addr, "IMG A \"42|hello\"\n", &data).await.unwrap();

        match next_action(&mut rx).await {
            Action::Deliver(Event::Image {
                from,
                bytes,
                comment,
                incomplete,
            }) => {
                assert_eq!(from, "A");
                assert_eq!(comment, "hello");
                assert_eq!(bytes, data);
                assert_eq!(incomplete, None);
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn early_close_delivers_partial_payload() {
        let (addr, mut rx) = receiver(core(true)).await;
        let data = payload(30);
        send_image(addr, "IMG A \"42|hello\"\n", &data).await.unwrap();

        match next_action(&mut rx).await {
            Action::Deliver(Event::Image {
                bytes, incomplete, ..
            }) => {
                assert_eq!(bytes, data);
                assert_eq!(
                    incomplete,
                    Some(ChatError::PartialTransfer {
                        expected: 42,
                        received: 30
                    })
                );
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn extra_bytes_after_declared_size_are_ignored() {
        let (addr, mut rx) = receiver(core(true)).await;
        let data = payload(50);
        // The receiver may close before reading the surplus, so the send can fail.
        let _ = send_image(addr, "IMG A 10|x\n", &data).await;
        match next_action(&mut rx).await {
            Action::Deliver(Event::Image { bytes, incomplete, .. }) => {
                assert_eq!(bytes, &data[..10]);
                assert!(incomplete.is_none());
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_over_tcp() {
        let (addr, mut rx) = receiver(core(true)).await;
        send_image(addr, "MSG carol \"a long text\"\n", &[]).await.unwrap();
        assert_eq!(
            next_action(&mut rx).await,
            Action::Deliver(Event::Text {
                from: "carol".into(),
                text: "a long text".into()
            })
        );
    }

    #[tokio::test]
    async fn bad_header_is_an_error() {
        let shared = core(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let r = handle_connection(&b"HELLO there\n"[..], peer, &shared, &tx).await;
        assert!(matches!(r, Err(ChatError::Protocol(_))));
        let r = handle_connection(&b""[..], peer, &shared, &tx).await;
        assert!(matches!(r, Err(ChatError::Transport(_))));
    }

    #[tokio::test]
    async fn bind_control_shares_port() {
        let (udp, tcp) = bind_control(0).await.unwrap();
        assert_eq!(
            udp.local_addr().unwrap().port(),
            tcp.local_addr().unwrap().port()
        );
    }

    #[tokio::test]
    async fn dispatcher_sends_direct_and_delivers() {
        let control = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let discovery = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let out = Outbound {
            control,
            discovery,
            whois_port: 4000,
        };
        let task = tokio::spawn(run_dispatcher(out, action_rx, event_tx, stop_rx));

        action_tx
            .send(Action::SendDirect {
                to: peer_addr,
                line: "MSG alice hi\n".into(),
            })
            .unwrap();
        action_tx
            .send(Action::Deliver(Event::PeerLeft {
                handle: "zed".into(),
            }))
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"MSG alice hi\n");
        assert_eq!(
            event_rx.recv().await,
            Some(Event::PeerLeft {
                handle: "zed".into()
            })
        );

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
