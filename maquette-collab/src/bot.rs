//! Simulated players for the legacy session.
//!
//! The bot module sits outside the session layer on purpose: it sees only a
//! broadcast callback and a stream of recorded `(position, rotation)`
//! samples, never the registries. The router feeds it real movement via
//! [`BotBridge::record_position`] and drains bot movement on a fixed tick;
//! joiners seed their roster view from [`BotBridge::player_data`].

use std::collections::VecDeque;

use crate::protocol::{ClientId, PlayerSnapshot, Role, Rotation, ServerEnvelope, Vec3};

/// Bot client ids live far above any id the connection registry will ever
/// assign, so origin filtering is a plain range check.
pub const BOT_ID_BASE: ClientId = 1 << 48;

/// Recorded movement samples kept for replay.
const PATH_CAPACITY: usize = 600;

/// How many samples apart consecutive bots trail the recorded path.
const BOT_STAGGER: usize = 40;

/// Boundary between the relay core and the simulated-player module.
///
/// Implementations must not hold session state; everything they know
/// arrives through these four calls.
pub trait BotBridge {
    /// Feed one real-player movement sample into the shared path.
    fn record_position(&mut self, position: Vec3, rotation: Rotation);

    /// Current bot roster entries, for seeding a joiner's player list.
    fn player_data(&self) -> Vec<PlayerSnapshot>;

    /// Ids of all simulated players, for origin filtering.
    fn bot_ids(&self) -> Vec<ClientId>;

    /// Advance the simulation one step, emitting any resulting envelopes
    /// through the supplied broadcast callback.
    fn tick(&mut self, broadcast: &mut dyn FnMut(&ServerEnvelope));
}

/// The inert bridge: no bots, nothing recorded, nothing emitted.
#[derive(Debug, Default)]
pub struct NoBots;

impl BotBridge for NoBots {
    fn record_position(&mut self, _position: Vec3, _rotation: Rotation) {}

    fn player_data(&self) -> Vec<PlayerSnapshot> {
        Vec::new()
    }

    fn bot_ids(&self) -> Vec<ClientId> {
        Vec::new()
    }

    fn tick(&mut self, _broadcast: &mut dyn FnMut(&ServerEnvelope)) {}
}

#[derive(Debug, Clone, Copy)]
struct PathSample {
    position: Vec3,
    rotation: Rotation,
}

#[derive(Debug)]
struct Bot {
    id: ClientId,
    display_name: String,
    position: Vec3,
    rotation: Rotation,
}

/// Bots that shadow recorded real-player movement.
///
/// Every incoming sample lands in a bounded ring; on each tick, bot `i`
/// re-emits the sample `(i + 1) * BOT_STAGGER` steps behind the newest one,
/// so a group of bots traces the same path as a trailing convoy. A bot
/// stays silent until enough history exists and freezes when recording
/// stops, emitting nothing while its sample is unchanged.
#[derive(Debug)]
pub struct PathReplayBots {
    path: VecDeque<PathSample>,
    bots: Vec<Bot>,
}

impl PathReplayBots {
    pub fn new(count: usize) -> Self {
        let bots = (0..count)
            .map(|n| Bot {
                id: BOT_ID_BASE + n as ClientId,
                display_name: format!("Bot {}", n + 1),
                position: Vec3::ZERO,
                rotation: Rotation::default(),
            })
            .collect();
        Self {
            path: VecDeque::with_capacity(PATH_CAPACITY),
            bots,
        }
    }

    /// Number of samples currently held in the replay ring.
    pub fn recorded_samples(&self) -> usize {
        self.path.len()
    }
}

impl BotBridge for PathReplayBots {
    fn record_position(&mut self, position: Vec3, rotation: Rotation) {
        if self.path.len() == PATH_CAPACITY {
            self.path.pop_front();
        }
        self.path.push_back(PathSample { position, rotation });
    }

    fn player_data(&self) -> Vec<PlayerSnapshot> {
        self.bots
            .iter()
            .map(|bot| PlayerSnapshot {
                player_id: bot.id,
                user_id: None,
                display_name: bot.display_name.clone(),
                role: Role::GuestView,
                position: bot.position,
                rotation: bot.rotation,
            })
            .collect()
    }

    fn bot_ids(&self) -> Vec<ClientId> {
        self.bots.iter().map(|bot| bot.id).collect()
    }

    fn tick(&mut self, broadcast: &mut dyn FnMut(&ServerEnvelope)) {
        for (i, bot) in self.bots.iter_mut().enumerate() {
            let lag = (i + 1) * BOT_STAGGER;
            let Some(idx) = self.path.len().checked_sub(lag + 1) else {
                continue;
            };
            let Some(sample) = self.path.get(idx).copied() else {
                continue;
            };
            if sample.position == bot.position && sample.rotation == bot.rotation {
                continue;
            }
            bot.position = sample.position;
            bot.rotation = sample.rotation;
            broadcast(&ServerEnvelope::PlayerMoved {
                player_id: bot.id,
                position: sample.position,
                rotation: sample.rotation,
            });
        }
    }
}
