//! murmur Node - tokio event loop around the dispatcher
//!
//! The node owns the UDP socket. Inbound datagrams, application commands,
//! finished name resolutions and timer deadlines are multiplexed in one
//! `select!` loop; each is handed to the [`Dispatcher`] and everything it
//! queued is flushed before the next input is taken.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use murmur_core::{MurmurError, MurmurResult, Origin, Rumor};
use murmur_transport::{
    local_ip_towards, resolve_neighbor, start_receive_loop, PortRange, UdpTransport,
};
use murmur_wire::AddressedPayload;

use crate::{Dispatcher, NeighborSpec, NodeConfig, NodeEvent};

const COMMAND_BUFFER: usize = 64;

/// Requests from the application to the event loop
#[derive(Debug)]
pub enum Command {
    Submit {
        body: String,
        reply: oneshot::Sender<MurmurResult<Rumor>>,
    },
    AddNeighbor(NeighborSpec),
    SendPayload {
        payload: AddressedPayload,
        reply: oneshot::Sender<bool>,
    },
    PrivateChat {
        dest: Origin,
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

type Resolution = (String, u16, MurmurResult<SocketAddr>);

/// A bound gossip node, ready to [`run`](Node::run)
pub struct Node {
    transport: UdpTransport,
    dispatcher: Dispatcher,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<NodeEvent>,
    event_rx: Option<mpsc::Receiver<NodeEvent>>,
}

impl Node {
    /// Bind the first free port of `range` on all interfaces. The other
    /// ports of the range become loopback neighbors.
    pub async fn bind(config: NodeConfig, range: PortRange) -> MurmurResult<Self> {
        config.validate()?;
        let transport = UdpTransport::bind_in_range(Ipv4Addr::UNSPECIFIED.into(), range).await?;
        let bound = transport.local_addr().port();
        let mut node = Self::with_transport(config, transport);
        for peer in range.loopback_peers(bound) {
            node.add_neighbor(NeighborSpec::Addr(peer));
        }
        Ok(node)
    }

    /// Bind exactly `addr`, without candidate loopback neighbors
    pub async fn bind_addr(config: NodeConfig, addr: SocketAddr) -> MurmurResult<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(addr).await?;
        Ok(Self::with_transport(config, transport))
    }

    fn with_transport(config: NodeConfig, transport: UdpTransport) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));

        let mut dispatcher = Dispatcher::new(config, now());
        dispatcher.set_local_addr(transport.local_addr());
        tracing::info!(origin = %dispatcher.origin(), addr = %transport.local_addr(), "node bound");

        Node {
            transport,
            dispatcher,
            command_tx,
            command_rx,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn origin(&self) -> &Origin {
        self.dispatcher.origin()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Add a neighbor before the loop starts
    pub fn add_neighbor(&mut self, spec: NeighborSpec) {
        self.dispatcher.add_neighbor(spec);
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.command_tx.clone(),
        }
    }

    /// Event stream for the application. Only the first call gets it.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<NodeEvent>> {
        self.event_rx.take()
    }

    /// Run until [`NodeHandle::shutdown`]
    pub async fn run(mut self) -> MurmurResult<()> {
        let mut packets =
            start_receive_loop(self.transport.socket(), self.dispatcher.config().recv_buffer);
        let (resolved_tx, mut resolved_rx) = mpsc::unbounded_channel::<Resolution>();

        self.flush(&resolved_tx).await;

        loop {
            let deadline = tokio::time::Instant::from_std(self.dispatcher.next_deadline());

            tokio::select! {
                packet = packets.recv() => {
                    let Some((bytes, from)) = packet else {
                        return Err(MurmurError::TransportError("receive loop ended".into()));
                    };
                    self.dispatcher.handle_datagram(&bytes, from, now());
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.apply(command),
                    }
                }
                Some((host, port, result)) = resolved_rx.recv() => {
                    self.dispatcher.resolved(&host, port, result);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.dispatcher.poll_timers(now());
                }
            }

            self.flush(&resolved_tx).await;
        }

        tracing::info!(origin = %self.dispatcher.origin(), "node stopped");
        Ok(())
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Submit { body, reply } => {
                let rumor = self.dispatcher.submit_local_message(body, now());
                let _ = reply.send(rumor);
            }
            Command::AddNeighbor(spec) => self.dispatcher.add_neighbor(spec),
            Command::SendPayload { payload, reply } => {
                let _ = reply.send(self.dispatcher.send_addressed_payload(payload));
            }
            Command::PrivateChat { dest, text, reply } => {
                let _ = reply.send(self.dispatcher.send_private_chat(dest, text));
            }
            Command::Shutdown => {}
        }
    }

    /// On a wildcard bind, the interface address a neighbor sees us under
    /// is one of ours and must never be taken for a neighbor.
    async fn learn_local_addr(&mut self, peer: SocketAddr) {
        let bound = self.transport.local_addr();
        if !bound.ip().is_unspecified() {
            return;
        }
        match local_ip_towards(peer).await {
            Ok(ip) => self
                .dispatcher
                .add_local_addr(SocketAddr::new(ip, bound.port())),
            Err(e) => tracing::debug!(peer = %peer, error = %e, "no local route to neighbor"),
        }
    }

    async fn flush(&mut self, resolved_tx: &mpsc::UnboundedSender<Resolution>) {
        while let Some((dest, envelope)) = self.dispatcher.pop_outgoing() {
            if let Err(e) = self.transport.send_to(&envelope, dest).await {
                tracing::warn!(peer = %dest, kind = envelope.kind(), error = %e, "send failed");
            }
        }

        while let Some((host, port)) = self.dispatcher.pop_resolution() {
            let tx = resolved_tx.clone();
            tokio::spawn(async move {
                let result = resolve_neighbor(&host, port).await;
                let _ = tx.send((host, port, result));
            });
        }

        while let Some(event) = self.dispatcher.pop_event() {
            if let NodeEvent::NeighborAdded(peer) = &event {
                self.learn_local_addr(*peer).await;
            }
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    tracing::warn!(?event, "event channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// Cloneable handle to a running [`Node`]
#[derive(Clone, Debug)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
}

impl NodeHandle {
    /// Originate a chat rumor
    pub async fn submit(&self, body: impl Into<String>) -> MurmurResult<Rumor> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            body: body.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| MurmurError::NodeClosed)?
    }

    pub async fn add_neighbor(&self, spec: NeighborSpec) -> MurmurResult<()> {
        self.send(Command::AddNeighbor(spec)).await
    }

    /// Route a payload to its destination. `Ok(false)` if no route is known.
    pub async fn send_payload(&self, payload: AddressedPayload) -> MurmurResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SendPayload { payload, reply }).await?;
        rx.await.map_err(|_| MurmurError::NodeClosed)
    }

    pub async fn send_private_chat(
        &self,
        dest: impl Into<Origin>,
        text: impl Into<String>,
    ) -> MurmurResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PrivateChat {
            dest: dest.into(),
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| MurmurError::NodeClosed)
    }

    pub async fn shutdown(&self) -> MurmurResult<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> MurmurResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MurmurError::NodeClosed)
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(origin: &str, seed: u64) -> NodeConfig {
        NodeConfig::default()
            .with_origin(origin)
            .with_seed(seed)
            .with_retransmit_interval(Duration::from_millis(100))
            .with_anti_entropy_interval(Duration::from_millis(200))
    }

    async fn node(origin: &str, seed: u64) -> Node {
        Node::bind_addr(config(origin, seed), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    async fn wait_for<F>(events: &mut mpsc::Receiver<NodeEvent>, mut pred: F) -> NodeEvent
    where
        F: FnMut(&NodeEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_chat_reaches_neighbor() {
        let mut a = node("A", 1).await;
        let mut b = node("B", 2).await;
        a.add_neighbor(NeighborSpec::Addr(b.local_addr()));
        let a_addr = a.local_addr();

        let a_handle = a.handle();
        let b_handle = b.handle();
        let mut b_events = b.take_events().unwrap();
        let a_task = tokio::spawn(a.run());
        let b_task = tokio::spawn(b.run());

        a_handle.submit("hi").await.unwrap();

        let event = wait_for(&mut b_events, |e| e.chat().is_some()).await;
        match event {
            NodeEvent::NewMessage { rumor, from, direct } => {
                assert_eq!(rumor.origin.as_str(), "A");
                assert_eq!(rumor.body.as_deref(), Some("hi"));
                assert_eq!(from, Some(a_addr));
                assert!(direct);
            }
            other => panic!("unexpected event {other:?}"),
        }

        a_handle.shutdown().await.unwrap();
        b_handle.shutdown().await.unwrap();
        assert!(a_task.await.unwrap().is_ok());
        assert!(b_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_private_chat_after_route_announcement() {
        let mut a = node("A", 3).await;
        let mut b = node("B", 4).await;
        a.add_neighbor(NeighborSpec::Addr(b.local_addr()));

        let a_handle = a.handle();
        let b_handle = b.handle();
        let mut a_events = a.take_events().unwrap();
        let mut b_events = b.take_events().unwrap();
        tokio::spawn(a.run());
        tokio::spawn(b.run());

        wait_for(&mut b_events, |e| {
            matches!(e, NodeEvent::RouteAdded { origin, .. } if origin.as_str() == "A")
        })
        .await;
        assert!(b_handle.send_private_chat("A", "psst").await.unwrap());

        let event = wait_for(&mut a_events, |e| matches!(e, NodeEvent::PayloadDelivered { .. })).await;
        let NodeEvent::PayloadDelivered { payload, .. } = event else {
            unreachable!();
        };
        assert_eq!(payload.chat_text(), Some("psst"));
        assert_eq!(payload.origin.as_ref().map(Origin::as_str), Some("B"));

        // no route to an unknown origin
        assert!(!b_handle.send_private_chat("Z", "anyone?").await.unwrap());

        a_handle.shutdown().await.unwrap();
        b_handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let a = node("A", 5).await;
        let handle = a.handle();
        let task = tokio::spawn(a.run());

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(matches!(
            handle.submit("late").await,
            Err(MurmurError::NodeClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_submit_is_refused() {
        let a = node("A", 7).await;
        let handle = a.handle();
        let task = tokio::spawn(a.run());

        assert!(matches!(
            handle.submit("x".repeat(9000)).await,
            Err(MurmurError::DatagramTooLarge { .. })
        ));
        let rumor = handle.submit("fits").await.unwrap();
        assert_eq!(rumor.seq.value(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_overlong_origin() {
        let config = config(&"a".repeat(murmur_wire::MAX_ORIGIN_LEN + 1), 8);
        let result = Node::bind_addr(config, "127.0.0.1:0".parse().unwrap()).await;
        assert!(matches!(result, Err(MurmurError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_bind_in_range_adds_loopback_peers() {
        // a range of ports nobody is likely to hold; skip if it is taken
        let range = PortRange::new(47_000, 4).unwrap();
        let Ok(node) = Node::bind(config("A", 6), range).await else {
            return;
        };
        let bound = node.local_addr().port();
        assert!(range.contains(bound));
        assert_eq!(node.dispatcher().neighbors().len(), 3);
        assert!(node
            .dispatcher()
            .neighbors()
            .iter()
            .all(|peer| peer.ip().is_loopback() && peer.port() != bound));
    }
}
