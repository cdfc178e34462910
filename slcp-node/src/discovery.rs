//! LAN discovery: shared UDP port for WHOIS/IAM and JOIN/LEAVE announcements.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::engine::{self, ActionSender, SharedCore};
use crate::net;

const RECV_BUF: usize = 2048;

/// Several nodes on one host share the discovery port, so the socket is bound with address reuse.
pub async fn make_discovery_socket(port: u16) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    sock.set_reuse_port(true)?;
    sock.set_broadcast(true)?;
    sock.set_nonblocking(true)?;
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    sock.bind(&bind.into())?;
    UdpSocket::from_std(sock.into())
}

/// Receive loop for the discovery port. Every datagram goes through the core; bad ones are logged and dropped.
pub async fn run_discovery(
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
                    engine::route_datagram(&core, &actions, from, &buf[..n], "discovery").await;
                }
                Err(e) => tracing::warn!("discovery recv failed: {}", e),
            },
        }
    }
    tracing::debug!("discovery loop stopped");
}

/// Send one line to the broadcast address on the discovery port.
pub async fn send_broadcast(socket: &UdpSocket, line: &str, port: u16) -> io::Result<SocketAddr> {
    let dest = SocketAddr::from((net::broadcast_addr(), port));
    socket.send_to(line.as_bytes(), dest).await?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slcp_core::{Action, ChatCore, Event, SessionState};
    use tokio::sync::{mpsc, Mutex};

    #[tokio::test]
    async fn two_sockets_share_the_port() {
        let a = make_discovery_socket(0).await.unwrap();
        let port = a.local_addr().unwrap().port();
        let b = make_discovery_socket(port).await;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        assert!(b.is_ok());
        drop(b);
    }

    #[tokio::test]
    async fn iam_datagram_reaches_core() {
        let socket = Arc::new(make_discovery_socket(0).await.unwrap());
        let port = socket.local_addr().unwrap().port();
        let core: SharedCore = Arc::new(Mutex::new(ChatCore::new(
            SessionState::new("alice", 5000),
            "127.0.0.1".parse().unwrap(),
        )));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_discovery(socket, core.clone(), tx, stop_rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"garbage\n", ("127.0.0.1", port))
            .await
            .unwrap();
        sender
            .send_to(b"IAM bob 127.0.0.1 5001\n", ("127.0.0.1", port))
            .await
            .unwrap();

        let action = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            action,
            Action::Deliver(Event::PeerDiscovered {
                handle: "bob".into(),
                addr: "127.0.0.1:5001".parse().unwrap(),
            })
        );
        assert!(core.lock().await.registry().get("bob").is_some());

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
