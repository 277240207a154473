//! In-process transport.
//!
//! ```text
//!                     accept queue (Mutex)
//! LoopbackNetwork::connect ──► [link, link, ...] ──► LoopbackServer::poll_event
//!
//! LoopbackClient ══ bounded channel ══► LoopbackServer
//!                ◄══ bounded channel ══
//! ```
//!
//! Client and server halves are `Send`, so they may live on different
//! threads. The link conditioner only ever drops unreliable packets;
//! reliable packets keep their order because each direction is one FIFO.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Pipeline, Transport, TransportEvent, TransportStats};
use crate::connection::ConnectionId;
use crate::error::{NetError, NetResult};

/// Packets in flight per direction before sends fail with `QueueFull`.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Frame {
    Data(Pipeline, Vec<u8>),
    Close,
}

/// Deterministic packet loss on the unreliable pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkConditioner {
    loss: f64,
    seed: u64,
}

impl LinkConditioner {
    /// Lossless link.
    #[must_use]
    pub const fn none() -> Self {
        Self { loss: 0.0, seed: 0 }
    }

    /// Drops each unreliable packet with probability `loss` (clamped to
    /// `0.0..=1.0`), drawn from an RNG seeded with `seed`.
    #[must_use]
    pub fn lossy(loss: f64, seed: u64) -> Self {
        Self {
            loss: if loss.is_nan() { 0.0 } else { loss.clamp(0.0, 1.0) },
            seed,
        }
    }

    /// Drop probability.
    #[must_use]
    pub const fn loss(&self) -> f64 {
        self.loss
    }

    fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn should_drop(&self, pipeline: Pipeline, rng: &mut StdRng) -> bool {
        pipeline == Pipeline::Unreliable && self.loss > 0.0 && rng.gen_bool(self.loss)
    }
}

impl Default for LinkConditioner {
    fn default() -> Self {
        Self::none()
    }
}

struct PendingLink {
    id: ConnectionId,
    to_client: Sender<Frame>,
    from_client: Receiver<Frame>,
}

struct Shared {
    accept: Mutex<VecDeque<PendingLink>>,
    next_id: AtomicU32,
    conditioner: LinkConditioner,
}

/// Handle used to open client links to a [`LoopbackServer`].
#[derive(Clone)]
pub struct LoopbackNetwork {
    shared: Arc<Shared>,
}

impl LoopbackNetwork {
    /// Creates a network and its server half.
    #[must_use]
    pub fn new(conditioner: LinkConditioner) -> (Self, LoopbackServer) {
        let shared = Arc::new(Shared {
            accept: Mutex::new(VecDeque::new()),
            next_id: AtomicU32::new(1),
            conditioner,
        });
        let server = LoopbackServer {
            shared: Arc::clone(&shared),
            links: BTreeMap::new(),
            rng: conditioner.rng(0),
            stats: TransportStats::default(),
        };
        (Self { shared }, server)
    }

    /// Opens a new client link. The server sees it on its next poll.
    #[must_use]
    pub fn connect(&self) -> LoopbackClient {
        let id = ConnectionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (to_server, from_client) = bounded(DEFAULT_QUEUE_CAPACITY);
        let (to_client, from_server) = bounded(DEFAULT_QUEUE_CAPACITY);
        self.shared.accept.lock().push_back(PendingLink {
            id,
            to_client,
            from_client,
        });
        tracing::debug!(connection = id.0, "loopback link opened");
        LoopbackClient {
            id,
            tx: to_server,
            rx: from_server,
            conditioner: self.shared.conditioner,
            rng: self.shared.conditioner.rng(u64::from(id.0)),
            announced: false,
            closed: false,
            stats: TransportStats::default(),
        }
    }
}

struct ServerLink {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

fn push(tx: &Sender<Frame>, frame: Frame) -> NetResult<()> {
    tx.try_send(frame).map_err(|err| match err {
        TrySendError::Full(_) => NetError::QueueFull,
        TrySendError::Disconnected(_) => NetError::TransportClosed,
    })
}

/// Server half of a [`LoopbackNetwork`].
pub struct LoopbackServer {
    shared: Arc<Shared>,
    links: BTreeMap<ConnectionId, ServerLink>,
    rng: StdRng,
    stats: TransportStats,
}

impl LoopbackServer {
    /// Number of open links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Traffic counters.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

impl Transport for LoopbackServer {
    fn send(
        &mut self,
        pipeline: Pipeline,
        connection: ConnectionId,
        payload: &[u8],
    ) -> NetResult<()> {
        let link = self
            .links
            .get(&connection)
            .ok_or(NetError::UnknownConnection(connection.0))?;
        if self.shared.conditioner.should_drop(pipeline, &mut self.rng) {
            self.stats.packets_dropped += 1;
            return Ok(());
        }
        push(&link.tx, Frame::Data(pipeline, payload.to_vec()))?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload.len() as u64;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        if let Some(pending) = self.shared.accept.lock().pop_front() {
            self.links.insert(
                pending.id,
                ServerLink {
                    tx: pending.to_client,
                    rx: pending.from_client,
                },
            );
            return Some(TransportEvent::Connect(pending.id));
        }

        let mut closed = None;
        for (id, link) in &self.links {
            match link.rx.try_recv() {
                Ok(Frame::Data(pipeline, payload)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += payload.len() as u64;
                    return Some(TransportEvent::Data {
                        connection: *id,
                        pipeline,
                        payload,
                    });
                }
                Ok(Frame::Close) | Err(TryRecvError::Disconnected) => {
                    closed = Some(*id);
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }
        }
        let id = closed?;
        self.links.remove(&id);
        Some(TransportEvent::Disconnect(id))
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(link) = self.links.remove(&connection) {
            // Dropping the sender closes the link even if the queue is full.
            let _ = link.tx.try_send(Frame::Close);
            tracing::debug!(connection = connection.0, "loopback link closed by server");
        }
    }
}

/// Client half of a [`LoopbackNetwork`] link.
///
/// Dropping the client closes the link.
pub struct LoopbackClient {
    id: ConnectionId,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    conditioner: LinkConditioner,
    rng: StdRng,
    announced: bool,
    closed: bool,
    stats: TransportStats,
}

impl LoopbackClient {
    /// Id of this link, as the server sees it.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns true once either side closed the link.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Traffic counters.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

impl Transport for LoopbackClient {
    fn send(
        &mut self,
        pipeline: Pipeline,
        connection: ConnectionId,
        payload: &[u8],
    ) -> NetResult<()> {
        if connection != self.id {
            return Err(NetError::UnknownConnection(connection.0));
        }
        if self.closed {
            return Err(NetError::TransportClosed);
        }
        if self.conditioner.should_drop(pipeline, &mut self.rng) {
            self.stats.packets_dropped += 1;
            return Ok(());
        }
        push(&self.tx, Frame::Data(pipeline, payload.to_vec()))?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload.len() as u64;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        if !self.announced {
            self.announced = true;
            return Some(TransportEvent::Connect(self.id));
        }
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(Frame::Data(pipeline, payload)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += payload.len() as u64;
                Some(TransportEvent::Data {
                    connection: self.id,
                    pipeline,
                    payload,
                })
            }
            Ok(Frame::Close) | Err(TryRecvError::Disconnected) => {
                self.closed = true;
                Some(TransportEvent::Disconnect(self.id))
            }
            Err(TryRecvError::Empty) => None,
        }
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if connection == self.id && !self.closed {
            self.closed = true;
            let _ = self.tx.try_send(Frame::Close);
        }
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(transport: &mut impl Transport) -> Vec<TransportEvent> {
        std::iter::from_fn(|| transport.poll_event()).collect()
    }

    #[test]
    fn test_connect_send_disconnect() {
        let (network, mut server) = LoopbackNetwork::new(LinkConditioner::none());
        let mut client = network.connect();
        let id = client.id();

        assert_eq!(drain(&mut client), vec![TransportEvent::Connect(id)]);
        client.send(Pipeline::Unreliable, id, &[1, 2, 3]).unwrap();
        assert_eq!(
            drain(&mut server),
            vec![
                TransportEvent::Connect(id),
                TransportEvent::Data {
                    connection: id,
                    pipeline: Pipeline::Unreliable,
                    payload: vec![1, 2, 3],
                },
            ]
        );

        server.send(Pipeline::ReliableSequenced, id, &[9]).unwrap();
        drop(client);
        assert_eq!(drain(&mut server), vec![TransportEvent::Disconnect(id)]);
        assert_eq!(server.link_count(), 0);
        assert_eq!(
            server.send(Pipeline::Unreliable, id, &[0]),
            Err(NetError::UnknownConnection(id.0))
        );
    }

    #[test]
    fn test_server_disconnect_reaches_client() {
        let (network, mut server) = LoopbackNetwork::new(LinkConditioner::none());
        let mut client = network.connect();
        let id = client.id();
        drain(&mut server);
        drain(&mut client);

        server.disconnect(id);
        assert_eq!(drain(&mut client), vec![TransportEvent::Disconnect(id)]);
        assert!(client.is_closed());
        assert_eq!(
            client.send(Pipeline::Unreliable, id, &[1]),
            Err(NetError::TransportClosed)
        );
    }

    #[test]
    fn test_conditioner_spares_reliable_packets() {
        let (network, mut server) = LoopbackNetwork::new(LinkConditioner::lossy(1.0, 7));
        let mut client = network.connect();
        let id = client.id();
        drain(&mut server);

        for i in 0..10u8 {
            client.send(Pipeline::Unreliable, id, &[i]).unwrap();
            client.send(Pipeline::ReliableSequenced, id, &[i]).unwrap();
        }
        let received: Vec<u8> = drain(&mut server)
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Data {
                    pipeline: Pipeline::ReliableSequenced,
                    payload,
                    ..
                } => Some(payload[0]),
                _ => None,
            })
            .collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
        assert_eq!(client.stats().packets_dropped, 10);
    }

    #[test]
    fn test_loss_is_deterministic() {
        let run = || {
            let (network, mut server) = LoopbackNetwork::new(LinkConditioner::lossy(0.3, 42));
            let mut client = network.connect();
            let id = client.id();
            for i in 0..100u8 {
                client.send(Pipeline::Unreliable, id, &[i]).unwrap();
            }
            drain(&mut server).len()
        };
        let first = run();
        assert_eq!(first, run());
        // Connect event plus roughly 70 packets.
        assert!(first > 40 && first < 100);
    }
}
