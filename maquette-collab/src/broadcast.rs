//! Fan-out of server envelopes to session rosters.
//!
//! An envelope heading to N members is serialized exactly once; the shared
//! `Arc<str>` frame is then cloned into each member's outbound queue. The
//! queues are unbounded, so enqueueing never blocks the router and a slow
//! reader only grows its own buffer.
//!
//! Stats are tracked via atomics so the hot path never takes a lock; they
//! are read via `stats()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::{ClientId, ProtocolError, ServerEnvelope};
use crate::registry::ConnectionRegistry;
use crate::session::Session;

/// Snapshot of fan-out counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastStats {
    /// Frames queued onto outbound channels.
    pub frames_sent: u64,
    /// Frames aimed at a connection whose channel had already closed.
    pub frames_dropped: u64,
}

struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }
}

/// Serialize-once fan-out over the connection registry.
///
/// The engine holds no connection state of its own; callers pass the
/// registry and the target session, which keeps all ownership in the
/// router and the engine trivially reusable from tests.
pub struct BroadcastEngine {
    stats: AtomicBroadcastStats,
}

impl BroadcastEngine {
    pub fn new() -> Self {
        Self {
            stats: AtomicBroadcastStats::new(),
        }
    }

    /// Send one envelope to every session member except `exclude`.
    ///
    /// Returns the number of connections the frame was queued on. Members
    /// without a live connection are counted as drops, not errors.
    pub fn fan_out(
        &self,
        connections: &ConnectionRegistry,
        session: &Session,
        exclude: Option<ClientId>,
        envelope: &ServerEnvelope,
    ) -> Result<usize, ProtocolError> {
        let frame: Arc<str> = Arc::from(envelope.encode()?);
        Ok(self.fan_out_frame(connections, session, exclude, &frame))
    }

    /// Fan out a pre-encoded frame (zero-copy path shared with `fan_out`).
    pub fn fan_out_frame(
        &self,
        connections: &ConnectionRegistry,
        session: &Session,
        exclude: Option<ClientId>,
        frame: &Arc<str>,
    ) -> usize {
        let mut delivered = 0usize;
        for player in session.players() {
            if Some(player.client_id) == exclude {
                continue;
            }
            match connections.get(player.client_id) {
                Some(handle) if handle.send(frame.clone()) => delivered += 1,
                _ => {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats
            .frames_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Send one envelope to every live connection, in a session or not.
    /// This is the callback surface handed to the bot module.
    pub fn broadcast_all(
        &self,
        connections: &ConnectionRegistry,
        envelope: &ServerEnvelope,
    ) -> Result<usize, ProtocolError> {
        let frame: Arc<str> = Arc::from(envelope.encode()?);
        let mut delivered = 0usize;
        for handle in connections.handles() {
            if handle.send(frame.clone()) {
                delivered += 1;
            } else {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats
            .frames_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        Ok(delivered)
    }

    /// Send one envelope to a single client. Returns whether it was queued.
    pub fn send_to(
        &self,
        connections: &ConnectionRegistry,
        client_id: ClientId,
        envelope: &ServerEnvelope,
    ) -> Result<bool, ProtocolError> {
        let frame: Arc<str> = Arc::from(envelope.encode()?);
        Ok(self.send_frame(connections, client_id, frame))
    }

    /// Queue a pre-encoded frame on a single connection.
    pub fn send_frame(
        &self,
        connections: &ConnectionRegistry,
        client_id: ClientId,
        frame: Arc<str>,
    ) -> bool {
        match connections.get(client_id) {
            Some(handle) if handle.send(frame) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Lock-free counter snapshot.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for BroadcastEngine {
    fn default() -> Self {
        Self::new()
    }
}
