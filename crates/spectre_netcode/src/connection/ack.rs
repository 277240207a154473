//! # Snapshot Acknowledgement
//!
//! Both peers track which snapshot ticks arrived as a newest tick plus a
//! 64-bit history mask:
//!
//! ```text
//! last = 100, mask = ...0001011
//!                          │││└─ tick 100 received
//!                          ││└── tick 99 received
//!                          │└─── tick 98 lost
//!                          └──── tick 97 received
//! ```
//!
//! The client fills the local half while receiving snapshots and sends it
//! back in every command packet; the server stores it as the remote half
//! and only picks delta baselines the mask proves were received.

use crate::protocol::is_newer_tick;

/// Snapshot receipt tracking for one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotAck {
    /// Newest snapshot tick the remote reported (server side).
    pub last_received_by_remote: u32,
    /// Receipt mask the remote reported, bit `i` = tick `last - i`.
    pub received_by_remote_mask: u64,
    /// Newest snapshot tick received locally (client side).
    pub last_received_local: u32,
    /// Local receipt mask, bit `i` = tick `last - i`.
    pub received_local_mask: u64,
}

impl SnapshotAck {
    /// Creates an empty acknowledgement state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_received_by_remote: 0,
            received_by_remote_mask: 0,
            last_received_local: 0,
            received_local_mask: 0,
        }
    }

    /// Returns true if a snapshot at `tick` would be newer than anything
    /// received locally.
    #[inline]
    #[must_use]
    pub const fn is_newer_local(&self, tick: u32) -> bool {
        self.last_received_local == 0 || is_newer_tick(tick, self.last_received_local)
    }

    /// Records local receipt of a snapshot.
    ///
    /// Returns `false` (and changes nothing) if the tick is not newer than
    /// the last one received.
    pub fn record_local(&mut self, tick: u32) -> bool {
        if !self.is_newer_local(tick) {
            return false;
        }
        let shift = tick.wrapping_sub(self.last_received_local);
        self.received_local_mask = if self.last_received_local == 0 || shift >= 64 {
            1
        } else {
            (self.received_local_mask << shift) | 1
        };
        self.last_received_local = tick;
        true
    }

    /// Stores the acknowledgement carried by a command packet.
    ///
    /// Older reports (reordered packets) are ignored.
    pub fn update_remote(&mut self, last: u32, mask: u64) {
        if self.last_received_by_remote == 0 || !is_newer_tick(self.last_received_by_remote, last)
        {
            self.last_received_by_remote = last;
            self.received_by_remote_mask = mask;
        }
    }

    /// Returns true if the remote reported receiving the snapshot at `tick`.
    #[must_use]
    pub const fn is_received_by_remote(&self, tick: u32) -> bool {
        if self.last_received_by_remote == 0 || tick == 0 {
            return false;
        }
        if is_newer_tick(tick, self.last_received_by_remote) {
            return false;
        }
        let age = self.last_received_by_remote.wrapping_sub(tick);
        age < 64 && self.received_by_remote_mask & (1u64 << age) != 0
    }

    /// Clears the local half (full resync).
    pub fn reset_local(&mut self) {
        self.last_received_local = 0;
        self.received_local_mask = 0;
    }
}
