//! Session model: one collaboration room with its roster, ordering counter,
//! and shared project state.
//!
//! A `Session` is pure state. It is owned exclusively by the
//! [`SessionRegistry`](crate::registry::SessionRegistry) and mutated only
//! from the router's run-to-completion handlers, so it carries no locks.
//! Connections refer to a session by id, never by reference — the registry
//! is the only lookup path.

use std::collections::HashMap;

use rand::Rng;
use uuid::Uuid;

use crate::protocol::{ClientId, LinkPermission, PlayerSnapshot, Role, Rotation, SessionId, Vec3};

/// Hard roster cap per session.
pub const MAX_ROSTER: usize = 25;

/// Invite-code alphabet. Uppercase plus digits, with the glyphs that read
/// ambiguously over a shoulder (I, O, 0, 1) left out.
pub const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Invite codes are always this long.
pub const INVITE_CODE_LEN: usize = 6;

/// Draw a fresh invite code. Uniqueness among active sessions is the
/// registry's job (it regenerates on collision).
pub fn generate_invite_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Derive a joiner's role from its supplied identity and the session's
/// access settings.
///
/// The owner's external identity wins when both sides are non-null and
/// equal; otherwise the link permission decides between guest-edit and
/// guest-view. Evaluated once at join time; roles never change afterwards.
pub fn derive_role(
    supplied_identity: Option<&str>,
    owner_identity: Option<&str>,
    link_permission: LinkPermission,
) -> Role {
    if let (Some(supplied), Some(owner)) = (supplied_identity, owner_identity) {
        if supplied == owner {
            return Role::Owner;
        }
    }
    match link_permission {
        LinkPermission::Edit => Role::GuestEdit,
        LinkPermission::View | LinkPermission::None => Role::GuestView,
    }
}

/// A roster entry. Role and identity are fixed at join; position and
/// rotation track the avatar.
#[derive(Debug, Clone)]
pub struct Player {
    pub client_id: ClientId,
    pub identity: Option<String>,
    pub display_name: String,
    pub role: Role,
    pub position: Vec3,
    pub rotation: Rotation,
}

impl Player {
    pub fn new(
        client_id: ClientId,
        identity: Option<String>,
        display_name: String,
        role: Role,
    ) -> Self {
        Self {
            client_id,
            identity,
            display_name,
            role,
            position: Vec3::ZERO,
            rotation: Rotation::default(),
        }
    }

    /// Wire-format view of this player.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.client_id,
            user_id: self.identity.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            position: self.position,
            rotation: self.rotation,
        }
    }
}

/// One collaboration room.
///
/// Invariants, upheld by the registry and router:
/// - a non-empty roster contains `owner_client_id` unless the session is
///   mid-teardown;
/// - `sequence_number` never decreases and moves by exactly 1 per committed
///   durable edit ([`Session::next_sequence`] is the only mutation path);
/// - `roster.len() <= MAX_ROSTER`.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub invite_code: String,
    pub owner_client_id: ClientId,
    pub owner_identity: Option<String>,
    /// Opaque scene blob, replaced wholesale by the owner's state pushes.
    pub project_xml: Option<String>,
    pub link_permission: LinkPermission,
    sequence_number: u64,
    roster: HashMap<ClientId, Player>,
    legacy: bool,
}

impl Session {
    pub(crate) fn new(
        invite_code: String,
        owner_client_id: ClientId,
        owner_identity: Option<String>,
        project_xml: Option<String>,
        link_permission: LinkPermission,
        legacy: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            invite_code,
            owner_client_id,
            owner_identity,
            project_xml,
            link_permission,
            sequence_number: 0,
            roster: HashMap::new(),
            legacy,
        }
    }

    /// Whether this is the auto-provisioned backward-compatibility session.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Current value of the per-session edit counter.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Commit a durable edit: advance the counter by exactly 1 and return
    /// the new value.
    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.sequence_number += 1;
        self.sequence_number
    }

    /// The session owner, by connection id (not by role — the legacy session
    /// grants everyone the owner role).
    pub fn is_owner(&self, client_id: ClientId) -> bool {
        self.owner_client_id == client_id
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub fn at_capacity(&self) -> bool {
        self.roster.len() >= MAX_ROSTER
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.roster.contains_key(&client_id)
    }

    pub fn player(&self, client_id: ClientId) -> Option<&Player> {
        self.roster.get(&client_id)
    }

    pub fn player_mut(&mut self, client_id: ClientId) -> Option<&mut Player> {
        self.roster.get_mut(&client_id)
    }

    pub(crate) fn insert_player(&mut self, player: Player) {
        debug_assert!(self.roster.len() < MAX_ROSTER);
        self.roster.insert(player.client_id, player);
    }

    pub(crate) fn remove_player(&mut self, client_id: ClientId) -> Option<Player> {
        self.roster.remove(&client_id)
    }

    /// Ids of all roster members, in no particular order.
    pub fn member_ids(&self) -> Vec<ClientId> {
        self.roster.keys().copied().collect()
    }

    /// Any member id, used for legacy owner handoff.
    pub(crate) fn any_member_id(&self) -> Option<ClientId> {
        self.roster.keys().next().copied()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.roster.values()
    }

    /// Wire-format snapshots of the whole roster.
    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.roster.values().map(Player::snapshot).collect()
    }
}
