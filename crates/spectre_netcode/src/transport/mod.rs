//! # Transport Layer
//!
//! The replication layer never touches sockets. It hands finished packets
//! to a [`Transport`] and polls it for [`TransportEvent`]s.
//!
//! ## Pipelines
//!
//! ```text
//! Unreliable         snapshots, commands    may drop, may reorder
//! ReliableSequenced  RPCs                   delivered once, in order
//! ```
//!
//! [`LoopbackNetwork`] is the in-process implementation used by tests and
//! the soak binary.

mod loopback;

pub use loopback::{LinkConditioner, LoopbackClient, LoopbackNetwork, LoopbackServer};

use crate::connection::ConnectionId;
use crate::error::NetResult;

/// Delivery guarantee of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pipeline {
    /// Fire and forget.
    Unreliable,
    /// Delivered exactly once, in send order.
    ReliableSequenced,
}

/// Something that happened on the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link came up.
    Connect(ConnectionId),
    /// A link went down.
    Disconnect(ConnectionId),
    /// A packet arrived.
    Data {
        /// Sending connection.
        connection: ConnectionId,
        /// Pipeline it travelled on.
        pipeline: Pipeline,
        /// Packet bytes.
        payload: Vec<u8>,
    },
}

/// Packet transport consumed by the sessions.
pub trait Transport: Send {
    /// Queues a packet towards `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or closed, or if the
    /// queue towards it is full.
    fn send(&mut self, pipeline: Pipeline, connection: ConnectionId, payload: &[u8])
        -> NetResult<()>;

    /// Returns the next pending event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Closes the link to `connection`. Unknown connections are ignored.
    fn disconnect(&mut self, connection: ConnectionId);
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets handed to the link.
    pub packets_sent: u64,
    /// Packets taken off the link.
    pub packets_received: u64,
    /// Bytes handed to the link.
    pub bytes_sent: u64,
    /// Bytes taken off the link.
    pub bytes_received: u64,
    /// Unreliable packets dropped by the link conditioner.
    pub packets_dropped: u64,
}
