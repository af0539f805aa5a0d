//! Connection and session registries.
//!
//! `ConnectionRegistry` maps live connections to their ephemeral state (the
//! assigned client id, the outbound frame sender, and at most one session
//! reference). `SessionRegistry` owns every active [`Session`] and is the
//! only path to look one up, keyed by id or invite code. The legacy
//! backward-compatibility session is owned here too, but never enters the
//! invite-code index, so `join_session` cannot reach it.
//!
//! Both registries are plain maps: they are owned by the router actor and
//! mutated only inside run-to-completion handlers, so no locking is needed.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{ClientId, LinkPermission, PlayerSnapshot, Role, SessionId};
use crate::session::{derive_role, generate_invite_code, Player, Session};

/// Sentinel invite code displayed for the legacy session. It contains
/// characters outside the invite alphabet and is never indexed, so no
/// `join_session` lookup can land on it.
pub const LEGACY_INVITE_CODE: &str = "~LEGACY~";

/// Ephemeral per-connection state.
#[derive(Debug)]
pub struct ClientHandle {
    pub client_id: ClientId,
    /// Lookup key into the session registry — never an owning reference.
    pub session_id: Option<SessionId>,
    outbound: UnboundedSender<Arc<str>>,
}

impl ClientHandle {
    /// Queue a pre-encoded frame for delivery. Returns false when the
    /// connection has already gone away.
    pub fn send(&self, frame: Arc<str>) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Maps live connections to client state and hands out client ids.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: ClientId,
    clients: HashMap<ClientId, ClientHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            clients: HashMap::new(),
        }
    }

    /// Assign the next client id, strictly increasing from 1 and never
    /// reused even after disconnect.
    pub fn register(&mut self, outbound: UnboundedSender<Arc<str>>) -> ClientId {
        let client_id = self.next_id;
        self.next_id += 1;
        self.clients.insert(
            client_id,
            ClientHandle {
                client_id,
                session_id: None,
                outbound,
            },
        );
        client_id
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&client_id)
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn session_of(&self, client_id: ClientId) -> Option<SessionId> {
        self.clients.get(&client_id).and_then(|c| c.session_id)
    }

    pub fn set_session(&mut self, client_id: ClientId, session_id: SessionId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.session_id = Some(session_id);
        }
    }

    pub fn clear_session(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.session_id = None;
        }
    }

    /// Remove a connection. Idempotent: a second call is a no-op. The caller
    /// must run the session leave procedure *before* this, so a session
    /// never briefly holds a member with no connection behind it.
    pub fn unregister(&mut self, client_id: ClientId) -> Option<ClientHandle> {
        self.clients.remove(&client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// All live connections, for whole-server fan-out.
    pub fn handles(&self) -> impl Iterator<Item = &ClientHandle> {
        self.clients.values()
    }
}

/// Why a join was refused. The router maps these onto wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("invite code does not match an active session")]
    UnknownCode,
    #[error("session does not accept link joins")]
    NoAccess,
    #[error("session roster is full")]
    Full,
}

/// What happened when a client left its session.
#[derive(Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The owner left an invite session: the session is gone and these
    /// remaining members were evicted with it.
    Closed { evicted: Vec<ClientId> },
    /// Ordinary departure; the session lives on.
    Departed,
    /// The departure emptied the legacy session and it was dropped.
    Drained,
    /// The client was not a member (stale reference); nothing changed.
    NotMember,
}

/// Owns all active sessions. Creation, lookup, and teardown all go through
/// here; sessions never leak out by value.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    by_code: HashMap<String, SessionId>,
    legacy_id: Option<SessionId>,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            by_code: HashMap::new(),
            legacy_id: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    /// Number of active sessions, the legacy one included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn legacy_id(&self) -> Option<SessionId> {
        self.legacy_id
    }

    /// Create a new invite session with the requester as sole member and
    /// owner. The invite code is regenerated until unique among active
    /// codes; codes freed by teardown may be reused later.
    pub fn create(
        &mut self,
        owner: ClientId,
        owner_identity: Option<String>,
        display_name: String,
        project_xml: Option<String>,
        link_permission: LinkPermission,
    ) -> &Session {
        let invite_code = loop {
            let code = generate_invite_code(&mut self.rng);
            if !self.by_code.contains_key(&code) {
                break code;
            }
        };
        let mut session = Session::new(
            invite_code.clone(),
            owner,
            owner_identity.clone(),
            project_xml,
            link_permission,
            false,
        );
        session.insert_player(Player::new(owner, owner_identity, display_name, Role::Owner));

        let session_id = session.id;
        self.by_code.insert(invite_code, session_id);
        self.sessions.entry(session_id).or_insert(session)
    }

    /// Run the join failure checks without mutating anything, in protocol
    /// order: unknown code, no access, full. The router consults this
    /// before its own `ALREADY_IN_SESSION` check, which the protocol
    /// places last.
    pub fn check_join(&self, invite_code: &str) -> Result<(), JoinError> {
        let session_id = self.by_code.get(invite_code).ok_or(JoinError::UnknownCode)?;
        let session = self.sessions.get(session_id).ok_or(JoinError::UnknownCode)?;
        if session.link_permission == LinkPermission::None {
            return Err(JoinError::NoAccess);
        }
        if session.at_capacity() {
            return Err(JoinError::Full);
        }
        Ok(())
    }

    /// Join an active session by invite code. On success returns the
    /// session and the new member's snapshot (for the join broadcast).
    pub fn join(
        &mut self,
        invite_code: &str,
        client_id: ClientId,
        identity: Option<String>,
        display_name: String,
    ) -> Result<(&Session, PlayerSnapshot), JoinError> {
        self.check_join(invite_code)?;
        let Some(&session_id) = self.by_code.get(invite_code) else {
            return Err(JoinError::UnknownCode);
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Err(JoinError::UnknownCode);
        };
        let role = derive_role(
            identity.as_deref(),
            session.owner_identity.as_deref(),
            session.link_permission,
        );
        let player = Player::new(client_id, identity, display_name, role);
        let snapshot = player.snapshot();
        session.insert_player(player);
        Ok((&*session, snapshot))
    }

    /// Add a client to the legacy session, provisioning it on first use.
    /// Every legacy participant holds the owner role. Returns the session,
    /// whether this call created it, and the new member's snapshot.
    pub fn legacy_join(
        &mut self,
        client_id: ClientId,
        display_name: String,
    ) -> Result<(&Session, bool, PlayerSnapshot), JoinError> {
        let (session_id, created) = match self.legacy_id {
            Some(id) => (id, false),
            None => {
                let session = Session::new(
                    LEGACY_INVITE_CODE.to_owned(),
                    client_id,
                    None,
                    None,
                    LinkPermission::Edit,
                    true,
                );
                let id = session.id;
                self.sessions.insert(id, session);
                self.legacy_id = Some(id);
                (id, true)
            }
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Err(JoinError::UnknownCode);
        };
        if session.at_capacity() {
            return Err(JoinError::Full);
        }
        let player = Player::new(client_id, None, display_name, Role::Owner);
        let snapshot = player.snapshot();
        session.insert_player(player);
        Ok((&*session, created, snapshot))
    }

    /// Remove a client from a session and run the teardown rules:
    ///
    /// - owner leaving an invite session closes it and evicts everyone;
    /// - the legacy session instead hands ownership to any remaining member
    ///   and only dies once its roster is empty.
    pub fn leave(&mut self, session_id: SessionId, client_id: ClientId) -> LeaveOutcome {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return LeaveOutcome::NotMember;
        };
        if session.remove_player(client_id).is_none() {
            return LeaveOutcome::NotMember;
        }

        if session.is_legacy() {
            if session.roster_len() == 0 {
                self.sessions.remove(&session_id);
                self.legacy_id = None;
                return LeaveOutcome::Drained;
            }
            if session.is_owner(client_id) {
                if let Some(next_owner) = session.any_member_id() {
                    session.owner_client_id = next_owner;
                }
            }
            return LeaveOutcome::Departed;
        }

        if session.is_owner(client_id) {
            let evicted = session.member_ids();
            let code = session.invite_code.clone();
            self.sessions.remove(&session_id);
            self.by_code.remove(&code);
            return LeaveOutcome::Closed { evicted };
        }

        LeaveOutcome::Departed
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
