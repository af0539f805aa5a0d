//! Message dispatch: one handler per envelope type.
//!
//! The router is synchronous. It owns every piece of mutable
//! state (connections, sessions, the bot bridge) and is driven one inbound
//! event at a time by the server's actor task, run to completion, so a
//! handler never observes another handler mid-mutation and none of the state
//! needs a lock. Tests drive it the same way, minus the transport.
//!
//! Every handler follows the same shape:
//!
//! ```text
//! resolve session (explicit ref, or legacy auto-join for relay traffic)
//!   → authorize (silent drop on denial)
//!   → mutate session state
//!   → fan out
//! ```

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::auth::{Action, ActionClass, AuthorizationPolicy};
use crate::bot::{BotBridge, NoBots};
use crate::broadcast::{BroadcastEngine, BroadcastStats};
use crate::protocol::{
    ClientEnvelope, ClientId, Decoded, ErrorCode, LinkPermission, PlayerSnapshot, Rotation,
    ServerEnvelope, SessionId, Vec3,
};
use crate::registry::{ConnectionRegistry, JoinError, LeaveOutcome, SessionRegistry};

fn join_error_code(err: JoinError) -> ErrorCode {
    match err {
        JoinError::UnknownCode => ErrorCode::NotFound,
        JoinError::NoAccess => ErrorCode::NoAccess,
        JoinError::Full => ErrorCode::SessionFull,
    }
}

/// Dispatches decoded envelopes to their handlers, threading the registries,
/// the policy, and the broadcast engine together.
pub struct MessageRouter {
    connections: ConnectionRegistry,
    sessions: SessionRegistry,
    policy: AuthorizationPolicy,
    broadcast: BroadcastEngine,
    bots: Box<dyn BotBridge + Send>,
    denied_edits: u64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::with_bots(Box::new(NoBots))
    }

    pub fn with_bots(bots: Box<dyn BotBridge + Send>) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            sessions: SessionRegistry::new(),
            policy: AuthorizationPolicy,
            broadcast: BroadcastEngine::new(),
            bots,
            denied_edits: 0,
        }
    }

    /// Admit a new connection and assign its client id.
    pub fn connect(&mut self, outbound: UnboundedSender<Arc<str>>) -> ClientId {
        let client_id = self.connections.register(outbound);
        log::info!(
            "client {client_id} connected ({} active)",
            self.connections.len()
        );
        client_id
    }

    /// Transport-reported disconnect. The leave procedure runs before the
    /// connection record goes away, so a session never briefly holds a
    /// member with no connection behind it.
    pub fn disconnect(&mut self, client_id: ClientId) {
        if let Some(session_id) = self.connections.session_of(client_id) {
            self.run_leave(session_id, client_id);
        }
        if self.connections.unregister(client_id).is_some() {
            log::info!(
                "client {client_id} disconnected ({} active)",
                self.connections.len()
            );
        }
    }

    /// Decode and dispatch one inbound text frame.
    pub fn handle_frame(&mut self, client_id: ClientId, text: &str) {
        match ClientEnvelope::decode(text) {
            Ok(Decoded::Envelope(envelope)) => self.dispatch(client_id, envelope),
            Ok(Decoded::Unknown(tag)) => {
                // Unknown tags are dropped, not errored: newer clients may
                // speak message types this server predates.
                log::debug!("client {client_id}: ignoring unknown message type {tag:?}");
            }
            Err(err) => {
                log::warn!("client {client_id}: undecodable frame: {err}");
                self.send_error(client_id, ErrorCode::InvalidMessage, err.to_string());
            }
        }
    }

    /// One bot simulation step, driven by the server's tick interval. Bot
    /// envelopes go to every live connection; the bridge never sees
    /// sessions.
    pub fn handle_tick(&mut self) {
        let connections = &self.connections;
        let broadcast = &self.broadcast;
        self.bots.tick(&mut |envelope| {
            if let Err(err) = broadcast.broadcast_all(connections, envelope) {
                log::warn!("bot broadcast failed: {err}");
            }
        });
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Edit attempts dropped by the authorization policy.
    pub fn denied_edits(&self) -> u64 {
        self.denied_edits
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.broadcast.stats()
    }

    // ─── Dispatch ───────────────────────────────────────────────────────────

    fn dispatch(&mut self, client_id: ClientId, envelope: ClientEnvelope) {
        match envelope {
            ClientEnvelope::CreateSession {
                user_id,
                user_name,
                project_xml,
                link_permission,
            } => self.handle_create_session(client_id, user_id, user_name, project_xml, link_permission),
            ClientEnvelope::JoinSession {
                invite_code,
                user_id,
                user_name,
            } => self.handle_join_session(client_id, invite_code, user_id, user_name),
            ClientEnvelope::LeaveSession => self.handle_leave_session(client_id),
            ClientEnvelope::Move { position, rotation } => {
                self.handle_move(client_id, position, rotation)
            }
            ClientEnvelope::Pointer { origin, target } => {
                self.handle_pointer(client_id, origin, target)
            }
            ClientEnvelope::FurnitureAdd {
                furniture_id,
                variation_path,
                position,
                rotation,
                plane_offset,
                parent_id,
            } => self.handle_furniture_add(
                client_id,
                furniture_id,
                variation_path,
                position,
                rotation,
                plane_offset,
                parent_id,
            ),
            ClientEnvelope::FurnitureRemove { furniture_id } => {
                self.handle_furniture_remove(client_id, furniture_id)
            }
            ClientEnvelope::FurnitureMove {
                furniture_id,
                position,
                rotation,
                plane_offset,
                committed,
            } => self.handle_furniture_move(
                client_id,
                furniture_id,
                position,
                rotation,
                plane_offset,
                committed,
            ),
            ClientEnvelope::FurnitureChangeVariation {
                furniture_id,
                variation_path,
            } => self.handle_furniture_change_variation(client_id, furniture_id, variation_path),
            ClientEnvelope::MaterialChange {
                target_id,
                target_type,
                material_path,
                category_id,
            } => self.handle_material_change(client_id, target_id, target_type, material_path, category_id),
            ClientEnvelope::UpdateState { project_xml } => {
                self.handle_update_state(client_id, project_xml)
            }
            ClientEnvelope::LinkPermissionChange { link_permission } => {
                self.handle_link_permission_change(client_id, link_permission)
            }
        }
    }

    // ─── Session lifecycle ──────────────────────────────────────────────────

    fn handle_create_session(
        &mut self,
        client_id: ClientId,
        user_id: Option<String>,
        user_name: Option<String>,
        project_xml: Option<String>,
        link_permission: Option<LinkPermission>,
    ) {
        if self.connections.session_of(client_id).is_some() {
            self.send_error(client_id, ErrorCode::AlreadyInSession, "already in a session");
            return;
        }
        let display_name = user_name.unwrap_or_else(|| format!("Player {client_id}"));
        let link_permission = link_permission.unwrap_or(LinkPermission::Edit);
        let (session_id, invite_code, sequence_number) = {
            let session =
                self.sessions
                    .create(client_id, user_id, display_name, project_xml, link_permission);
            (session.id, session.invite_code.clone(), session.sequence_number())
        };
        self.connections.set_session(client_id, session_id);
        log::info!("client {client_id} created session {session_id} (code {invite_code})");
        // No broadcast: the room has exactly one member.
        self.reply(
            client_id,
            &ServerEnvelope::SessionCreated {
                invite_code,
                session_id,
                sequence_number,
                player_id: client_id,
            },
        );
    }

    fn handle_join_session(
        &mut self,
        client_id: ClientId,
        invite_code: String,
        user_id: Option<String>,
        user_name: Option<String>,
    ) {
        // Failure precedence is protocol-visible: unknown code, no access,
        // full, and only then already-in-session.
        if let Err(err) = self.sessions.check_join(&invite_code) {
            self.send_error(client_id, join_error_code(err), err.to_string());
            return;
        }
        if self.connections.session_of(client_id).is_some() {
            self.send_error(client_id, ErrorCode::AlreadyInSession, "already in a session");
            return;
        }
        let display_name = user_name.unwrap_or_else(|| format!("Player {client_id}"));
        let (session_id, snapshot, state) =
            match self.sessions.join(&invite_code, client_id, user_id, display_name) {
                Ok((session, snapshot)) => {
                    // Full snapshot for the joiner, which missed every
                    // incremental edit so far.
                    let state = ServerEnvelope::SessionState {
                        project_xml: session.project_xml.clone(),
                        sequence_number: session.sequence_number(),
                        presence: session.snapshots(),
                        role: snapshot.role,
                        player_id: client_id,
                    };
                    (session.id, snapshot, state)
                }
                Err(err) => {
                    self.send_error(client_id, join_error_code(err), err.to_string());
                    return;
                }
            };
        self.connections.set_session(client_id, session_id);
        log::info!(
            "client {client_id} joined session {session_id} as {:?}",
            snapshot.role
        );
        self.reply(client_id, &state);
        if let Some(session) = self.sessions.get(session_id) {
            let _ = self.broadcast.fan_out(
                &self.connections,
                session,
                Some(client_id),
                &ServerEnvelope::PlayerJoined { player: snapshot },
            );
        }
    }

    fn handle_leave_session(&mut self, client_id: ClientId) {
        let Some(session_id) = self.connections.session_of(client_id) else {
            self.send_error(client_id, ErrorCode::InvalidMessage, "not in a session");
            return;
        };
        self.run_leave(session_id, client_id);
    }

    /// The leave procedure, shared by the `leave_session` message and
    /// transport disconnect.
    fn run_leave(&mut self, session_id: SessionId, client_id: ClientId) {
        self.connections.clear_session(client_id);
        match self.sessions.leave(session_id, client_id) {
            LeaveOutcome::Closed { evicted } => {
                log::info!(
                    "session {session_id} closed (owner client {client_id} left, {} evicted)",
                    evicted.len()
                );
                let closed = ServerEnvelope::SessionClosed {
                    reason: "owner_left".to_owned(),
                };
                match closed.encode() {
                    Ok(text) => {
                        let frame: Arc<str> = Arc::from(text);
                        for member in evicted {
                            self.connections.clear_session(member);
                            self.broadcast.send_frame(&self.connections, member, frame.clone());
                        }
                    }
                    Err(err) => log::error!("session_closed encode failed: {err}"),
                }
            }
            LeaveOutcome::Departed => {
                log::info!("client {client_id} left session {session_id}");
                if let Some(session) = self.sessions.get(session_id) {
                    let _ = self.broadcast.fan_out(
                        &self.connections,
                        session,
                        None,
                        &ServerEnvelope::PlayerLeft { player_id: client_id },
                    );
                }
            }
            LeaveOutcome::Drained => {
                log::info!("legacy session {session_id} drained and removed");
            }
            LeaveOutcome::NotMember => {}
        }
    }

    // ─── Session resolution & authorization ─────────────────────────────────

    /// Resolve the sender's session for relay-class traffic (movement,
    /// pointer rays, scene edits). A client with no explicit session is
    /// silently provisioned into the legacy session, welcome envelope and
    /// all. Returns `None` if the client cannot be placed.
    fn resolve_session_for_relay(&mut self, client_id: ClientId) -> Option<SessionId> {
        if let Some(session_id) = self.connections.session_of(client_id) {
            return Some(session_id);
        }
        let display_name = format!("Player {client_id}");
        match self.sessions.legacy_join(client_id, display_name) {
            Ok((session, created, snapshot)) => {
                let session_id = session.id;
                // Seed the joiner's roster view: everyone already in the
                // room, plus the simulated players.
                let mut players: Vec<PlayerSnapshot> = session
                    .players()
                    .filter(|p| p.client_id != client_id)
                    .map(|p| p.snapshot())
                    .collect();
                players.extend(self.bots.player_data());
                self.connections.set_session(client_id, session_id);
                if created {
                    log::info!("legacy session {session_id} provisioned for client {client_id}");
                } else {
                    log::info!("client {client_id} auto-joined legacy session {session_id}");
                }
                self.reply(
                    client_id,
                    &ServerEnvelope::Welcome {
                        player_id: client_id,
                        players,
                    },
                );
                if let Some(session) = self.sessions.get(session_id) {
                    let _ = self.broadcast.fan_out(
                        &self.connections,
                        session,
                        Some(client_id),
                        &ServerEnvelope::PlayerJoined { player: snapshot },
                    );
                }
                Some(session_id)
            }
            Err(err) => {
                self.send_error(client_id, join_error_code(err), err.to_string());
                None
            }
        }
    }

    /// Admin actions never auto-provision; a missing explicit session is an
    /// error rather than a fallback.
    fn explicit_session(&mut self, client_id: ClientId) -> Option<SessionId> {
        match self.connections.session_of(client_id) {
            Some(session_id) => Some(session_id),
            None => {
                self.send_error(client_id, ErrorCode::InvalidMessage, "not in a session");
                None
            }
        }
    }

    /// Look up the sender's role and evaluate the policy. Admin actions
    /// additionally require the owner *connection*, not just the owner
    /// role. Denials are silent on the wire and only counted.
    fn authorized(&mut self, session_id: SessionId, client_id: ClientId, action: Action) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        let Some(role) = session.player(client_id).map(|p| p.role) else {
            return false;
        };
        let permitted = self.policy.permits(role, action)
            && (action.class() != ActionClass::Admin || session.is_owner(client_id));
        if !permitted {
            self.denied_edits += 1;
            log::debug!("client {client_id}: {action:?} denied for role {role:?} (dropped)");
        }
        permitted
    }

    // ─── Presence relay ─────────────────────────────────────────────────────

    fn handle_move(&mut self, client_id: ClientId, position: Vec3, rotation: Rotation) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::Move) {
            return;
        }
        let legacy = {
            let Some(session) = self.sessions.get_mut(session_id) else {
                return;
            };
            if let Some(player) = session.player_mut(client_id) {
                player.position = position;
                player.rotation = rotation;
            }
            session.is_legacy()
        };
        if legacy {
            // The legacy path feeds the bot module's replay buffer.
            self.bots.record_position(position, rotation);
        }
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::PlayerMoved {
                player_id: client_id,
                position,
                rotation,
            },
        );
    }

    fn handle_pointer(&mut self, client_id: ClientId, origin: Vec3, target: Vec3) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::Pointer) {
            return;
        }
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::Pointer {
                player_id: client_id,
                origin,
                target,
            },
        );
    }

    // ─── Scene edits ────────────────────────────────────────────────────────

    fn handle_furniture_add(
        &mut self,
        client_id: ClientId,
        furniture_id: String,
        variation_path: String,
        position: Vec3,
        rotation: Rotation,
        plane_offset: Option<f32>,
        parent_id: Option<String>,
    ) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::FurnitureAdd) {
            return;
        }
        let Some(sequence_number) = self.bump_sequence(session_id) else {
            return;
        };
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::FurnitureAdd {
                player_id: client_id,
                furniture_id,
                variation_path,
                position,
                rotation,
                plane_offset,
                parent_id,
                sequence_number,
            },
        );
    }

    fn handle_furniture_remove(&mut self, client_id: ClientId, furniture_id: String) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::FurnitureRemove) {
            return;
        }
        let Some(sequence_number) = self.bump_sequence(session_id) else {
            return;
        };
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::FurnitureRemove {
                player_id: client_id,
                furniture_id,
                sequence_number,
            },
        );
    }

    fn handle_furniture_move(
        &mut self,
        client_id: ClientId,
        furniture_id: String,
        position: Vec3,
        rotation: Rotation,
        plane_offset: Option<f32>,
        committed: bool,
    ) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::FurnitureMove) {
            return;
        }
        // Only a committed placement is a durable edit; mid-drag previews
        // relay for live feedback without consuming a sequence number.
        let sequence_number = if committed {
            match self.bump_sequence(session_id) {
                Some(seq) => Some(seq),
                None => return,
            }
        } else {
            None
        };
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::FurnitureMove {
                player_id: client_id,
                furniture_id,
                position,
                rotation,
                plane_offset,
                committed,
                sequence_number,
            },
        );
    }

    fn handle_furniture_change_variation(
        &mut self,
        client_id: ClientId,
        furniture_id: String,
        variation_path: String,
    ) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::FurnitureChangeVariation) {
            return;
        }
        let Some(sequence_number) = self.bump_sequence(session_id) else {
            return;
        };
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::FurnitureChangeVariation {
                player_id: client_id,
                furniture_id,
                variation_path,
                sequence_number,
            },
        );
    }

    fn handle_material_change(
        &mut self,
        client_id: ClientId,
        target_id: String,
        target_type: String,
        material_path: String,
        category_id: Option<String>,
    ) {
        let Some(session_id) = self.resolve_session_for_relay(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::MaterialChange) {
            return;
        }
        let Some(sequence_number) = self.bump_sequence(session_id) else {
            return;
        };
        self.relay(
            session_id,
            Some(client_id),
            &ServerEnvelope::MaterialChange {
                player_id: client_id,
                target_id,
                target_type,
                material_path,
                category_id,
                sequence_number,
            },
        );
    }

    // ─── Admin actions ──────────────────────────────────────────────────────

    fn handle_update_state(&mut self, client_id: ClientId, project_xml: String) {
        let Some(session_id) = self.explicit_session(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::UpdateState) {
            return;
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.project_xml = Some(project_xml);
            log::debug!("session {session_id}: project state replaced by owner");
        }
        // No broadcast and no sequence bump: the snapshot only serves
        // future joiners. Current members already saw every durable edit.
    }

    fn handle_link_permission_change(&mut self, client_id: ClientId, link_permission: LinkPermission) {
        let Some(session_id) = self.explicit_session(client_id) else {
            return;
        };
        if !self.authorized(session_id, client_id, Action::LinkPermissionChange) {
            return;
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.link_permission = link_permission;
        }
        log::info!("session {session_id}: link permission set to {link_permission:?}");
        // Nobody excluded: the sender's own permission view updates too.
        self.relay(
            session_id,
            None,
            &ServerEnvelope::LinkPermissionChanged { link_permission },
        );
    }

    // ─── Send helpers ───────────────────────────────────────────────────────

    fn bump_sequence(&mut self, session_id: SessionId) -> Option<u64> {
        self.sessions.get_mut(session_id).map(|s| s.next_sequence())
    }

    fn relay(&self, session_id: SessionId, exclude: Option<ClientId>, envelope: &ServerEnvelope) {
        if let Some(session) = self.sessions.get(session_id) {
            match self.broadcast.fan_out(&self.connections, session, exclude, envelope) {
                Ok(count) => log::trace!("relayed to {count} members of session {session_id}"),
                Err(err) => log::error!("relay encode failed: {err}"),
            }
        }
    }

    fn reply(&self, client_id: ClientId, envelope: &ServerEnvelope) {
        if let Err(err) = self.broadcast.send_to(&self.connections, client_id, envelope) {
            log::error!("client {client_id}: reply encode failed: {err}");
        }
    }

    fn send_error(&self, client_id: ClientId, code: ErrorCode, message: impl Into<String>) {
        self.reply(client_id, &ServerEnvelope::error(code, message));
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{PathReplayBots, BOT_ID_BASE};
    use crate::protocol::Role;
    use crate::session::{INVITE_CODE_LEN, MAX_ROSTER};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct TestClient {
        id: ClientId,
        rx: UnboundedReceiver<Arc<str>>,
    }

    impl TestClient {
        fn next(&mut self) -> ServerEnvelope {
            let frame = self.rx.try_recv().expect("expected an envelope");
            ServerEnvelope::decode(&frame).expect("server frame must decode")
        }

        fn assert_silent(&mut self) {
            if let Ok(frame) = self.rx.try_recv() {
                panic!("expected silence, got {frame}");
            }
        }
    }

    fn connect(router: &mut MessageRouter) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = router.connect(tx);
        TestClient { id, rx }
    }

    fn send(router: &mut MessageRouter, client: &TestClient, envelope: &ClientEnvelope) {
        router.handle_frame(client.id, &envelope.encode().unwrap());
    }

    /// Connect a fresh client and create a session; returns it with the
    /// invite code.
    fn create_session(router: &mut MessageRouter, link: LinkPermission) -> (TestClient, String) {
        let mut client = connect(router);
        send(
            router,
            &client,
            &ClientEnvelope::CreateSession {
                user_id: None,
                user_name: None,
                project_xml: None,
                link_permission: Some(link),
            },
        );
        match client.next() {
            ServerEnvelope::SessionCreated { invite_code, .. } => (client, invite_code),
            other => panic!("expected session_created, got {other:?}"),
        }
    }

    /// Connect a fresh client and join by code, consuming the snapshot.
    fn join(router: &mut MessageRouter, code: &str) -> TestClient {
        let mut client = connect(router);
        send(
            router,
            &client,
            &ClientEnvelope::JoinSession {
                invite_code: code.to_owned(),
                user_id: None,
                user_name: None,
            },
        );
        match client.next() {
            ServerEnvelope::SessionState { .. } => client,
            other => panic!("expected session_state, got {other:?}"),
        }
    }

    fn move_to(x: f32) -> ClientEnvelope {
        ClientEnvelope::Move {
            position: Vec3::new(x, 0.0, 0.0),
            rotation: Rotation::default(),
        }
    }

    fn add_f1() -> ClientEnvelope {
        ClientEnvelope::FurnitureAdd {
            furniture_id: "f1".into(),
            variation_path: "chairs/01".into(),
            position: Vec3::ZERO,
            rotation: Rotation::default(),
            plane_offset: None,
            parent_id: None,
        }
    }

    fn move_f1(committed: bool) -> ClientEnvelope {
        ClientEnvelope::FurnitureMove {
            furniture_id: "f1".into(),
            position: Vec3::new(2.0, 0.0, 2.0),
            rotation: Rotation::default(),
            plane_offset: None,
            committed,
        }
    }

    #[test]
    fn test_create_session_replies_to_creator_only() {
        let mut router = MessageRouter::new();
        let mut a = connect(&mut router);
        send(
            &mut router,
            &a,
            &ClientEnvelope::CreateSession {
                user_id: Some("u1".into()),
                user_name: Some("Ada".into()),
                project_xml: None,
                link_permission: None,
            },
        );
        match a.next() {
            ServerEnvelope::SessionCreated {
                invite_code,
                sequence_number,
                player_id,
                ..
            } => {
                assert_eq!(invite_code.len(), INVITE_CODE_LEN);
                assert_eq!(sequence_number, 0);
                assert_eq!(player_id, a.id);
            }
            other => panic!("expected session_created, got {other:?}"),
        }
        a.assert_silent();
        assert_eq!(router.session_count(), 1);
    }

    #[test]
    fn test_create_while_in_session_is_rejected() {
        let mut router = MessageRouter::new();
        let (mut a, _) = create_session(&mut router, LinkPermission::Edit);
        send(
            &mut router,
            &a,
            &ClientEnvelope::CreateSession {
                user_id: None,
                user_name: None,
                project_xml: None,
                link_permission: None,
            },
        );
        match a.next() {
            ServerEnvelope::SessionError { code, .. } => {
                assert_eq!(code, ErrorCode::AlreadyInSession)
            }
            other => panic!("expected session_error, got {other:?}"),
        }
        assert_eq!(router.session_count(), 1);
    }

    #[test]
    fn test_join_delivers_snapshot_and_notifies_roster() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = connect(&mut router);
        send(
            &mut router,
            &b,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: None,
                user_name: Some("Grace".into()),
            },
        );
        match b.next() {
            ServerEnvelope::SessionState {
                presence,
                role,
                player_id,
                sequence_number,
                project_xml,
            } => {
                assert_eq!(presence.len(), 2);
                assert!(presence.iter().any(|p| p.player_id == b.id));
                assert_eq!(role, Role::GuestEdit);
                assert_eq!(player_id, b.id);
                assert_eq!(sequence_number, 0);
                assert!(project_xml.is_none());
            }
            other => panic!("expected session_state, got {other:?}"),
        }
        match a.next() {
            ServerEnvelope::PlayerJoined { player } => {
                assert_eq!(player.player_id, b.id);
                assert_eq!(player.display_name, "Grace");
            }
            other => panic!("expected player_joined, got {other:?}"),
        }
        // The joiner is excluded from its own join broadcast.
        b.assert_silent();
    }

    #[test]
    fn test_join_unknown_code_is_not_found() {
        let mut router = MessageRouter::new();
        let (mut a, _) = create_session(&mut router, LinkPermission::Edit);
        let mut b = connect(&mut router);
        send(
            &mut router,
            &b,
            &ClientEnvelope::JoinSession {
                // Lowercase never appears in generated codes.
                invite_code: "zzzzzz".into(),
                user_id: None,
                user_name: None,
            },
        );
        match b.next() {
            ServerEnvelope::SessionError { code, .. } => assert_eq!(code, ErrorCode::NotFound),
            other => panic!("expected session_error, got {other:?}"),
        }
        // No roster mutation anywhere.
        a.assert_silent();
    }

    #[test]
    fn test_join_respects_link_permission_none() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::None);
        let mut b = connect(&mut router);
        send(
            &mut router,
            &b,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: None,
                user_name: None,
            },
        );
        match b.next() {
            ServerEnvelope::SessionError { code, .. } => assert_eq!(code, ErrorCode::NoAccess),
            other => panic!("expected session_error, got {other:?}"),
        }
        a.assert_silent();
    }

    #[test]
    fn test_join_full_session() {
        let mut router = MessageRouter::new();
        let (_a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut members = Vec::new();
        for _ in 1..MAX_ROSTER {
            members.push(join(&mut router, &code));
        }
        let mut late = connect(&mut router);
        send(
            &mut router,
            &late,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: None,
                user_name: None,
            },
        );
        match late.next() {
            ServerEnvelope::SessionError { code, .. } => assert_eq!(code, ErrorCode::SessionFull),
            other => panic!("expected session_error, got {other:?}"),
        }
    }

    #[test]
    fn test_join_failure_order_checks_code_before_membership() {
        let mut router = MessageRouter::new();
        let (mut a, _) = create_session(&mut router, LinkPermission::Edit);
        // A is already in a session, but an unknown code still reports
        // NOT_FOUND: the already-in-session check comes last.
        send(
            &mut router,
            &a,
            &ClientEnvelope::JoinSession {
                invite_code: "zzzzzz".into(),
                user_id: None,
                user_name: None,
            },
        );
        match a.next() {
            ServerEnvelope::SessionError { code, .. } => assert_eq!(code, ErrorCode::NotFound),
            other => panic!("expected session_error, got {other:?}"),
        }
    }

    #[test]
    fn test_join_while_in_session_is_rejected() {
        let mut router = MessageRouter::new();
        let (mut a, _) = create_session(&mut router, LinkPermission::Edit);
        let (mut b, code_b) = create_session(&mut router, LinkPermission::Edit);
        send(
            &mut router,
            &a,
            &ClientEnvelope::JoinSession {
                invite_code: code_b,
                user_id: None,
                user_name: None,
            },
        );
        match a.next() {
            ServerEnvelope::SessionError { code, .. } => {
                assert_eq!(code, ErrorCode::AlreadyInSession)
            }
            other => panic!("expected session_error, got {other:?}"),
        }
        b.assert_silent();
    }

    #[test]
    fn test_furniture_add_increments_sequence_and_skips_sender() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(&mut router, &b, &add_f1());
        match a.next() {
            ServerEnvelope::FurnitureAdd {
                player_id,
                furniture_id,
                sequence_number,
                ..
            } => {
                assert_eq!(player_id, b.id);
                assert_eq!(furniture_id, "f1");
                assert_eq!(sequence_number, 1);
            }
            other => panic!("expected furniture_add, got {other:?}"),
        }
        b.assert_silent();
    }

    #[test]
    fn test_preview_moves_do_not_consume_sequence_numbers() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let b = join(&mut router, &code);
        a.next(); // player_joined

        send(&mut router, &b, &move_f1(false));
        send(&mut router, &b, &move_f1(false));
        send(&mut router, &b, &move_f1(true));

        for expected_commit in [false, false, true] {
            match a.next() {
                ServerEnvelope::FurnitureMove {
                    committed,
                    sequence_number,
                    ..
                } => {
                    assert_eq!(committed, expected_commit);
                    if expected_commit {
                        assert_eq!(sequence_number, Some(1));
                    } else {
                        assert_eq!(sequence_number, None);
                    }
                }
                other => panic!("expected furniture_move, got {other:?}"),
            }
        }

        // The next durable edit continues from the committed move.
        send(&mut router, &b, &add_f1());
        match a.next() {
            ServerEnvelope::FurnitureAdd { sequence_number, .. } => assert_eq!(sequence_number, 2),
            other => panic!("expected furniture_add, got {other:?}"),
        }
    }

    #[test]
    fn test_guest_view_edits_are_silently_dropped() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::View);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(&mut router, &b, &add_f1());
        send(&mut router, &b, &move_f1(true));
        send(
            &mut router,
            &b,
            &ClientEnvelope::MaterialChange {
                target_id: "wall-1".into(),
                target_type: "wall".into(),
                material_path: "paint/red".into(),
                category_id: None,
            },
        );

        // No broadcast, and no error envelope either.
        a.assert_silent();
        b.assert_silent();
        assert_eq!(router.denied_edits(), 3);

        // The sequence counter never moved: the owner's first edit is 1.
        send(&mut router, &a, &add_f1());
        match b.next() {
            ServerEnvelope::FurnitureAdd { sequence_number, .. } => assert_eq!(sequence_number, 1),
            other => panic!("expected furniture_add, got {other:?}"),
        }

        // Movement is still open to guest-view.
        send(&mut router, &b, &move_to(4.0));
        match a.next() {
            ServerEnvelope::PlayerMoved { player_id, .. } => assert_eq!(player_id, b.id),
            other => panic!("expected player_moved, got {other:?}"),
        }
    }

    #[test]
    fn test_owner_disconnect_tears_down_session() {
        let mut router = MessageRouter::new();
        let (a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);

        router.disconnect(a.id);
        match b.next() {
            ServerEnvelope::SessionClosed { reason } => assert_eq!(reason, "owner_left"),
            other => panic!("expected session_closed, got {other:?}"),
        }
        assert_eq!(router.session_count(), 0);

        // B's session reference is gone: its next move lands in a freshly
        // provisioned legacy session, not the old room.
        send(&mut router, &b, &move_to(1.0));
        match b.next() {
            ServerEnvelope::Welcome { player_id, players } => {
                assert_eq!(player_id, b.id);
                assert!(players.is_empty());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        assert_eq!(router.session_count(), 1);
    }

    #[test]
    fn test_leave_session_notifies_remainder() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(&mut router, &b, &ClientEnvelope::LeaveSession);
        match a.next() {
            ServerEnvelope::PlayerLeft { player_id } => assert_eq!(player_id, b.id),
            other => panic!("expected player_left, got {other:?}"),
        }
        assert_eq!(router.session_count(), 1);

        // The leaver is free to start its own session.
        send(
            &mut router,
            &b,
            &ClientEnvelope::CreateSession {
                user_id: None,
                user_name: None,
                project_xml: None,
                link_permission: None,
            },
        );
        assert!(matches!(b.next(), ServerEnvelope::SessionCreated { .. }));
        assert_eq!(router.session_count(), 2);
    }

    #[test]
    fn test_leave_without_session_is_invalid() {
        let mut router = MessageRouter::new();
        let mut c = connect(&mut router);
        send(&mut router, &c, &ClientEnvelope::LeaveSession);
        match c.next() {
            ServerEnvelope::SessionError { code, message } => {
                assert_eq!(code, ErrorCode::InvalidMessage);
                assert!(message.contains("not in a session"));
            }
            other => panic!("expected session_error, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_session_provisioned_on_first_move() {
        let mut router = MessageRouter::new();
        let mut c = connect(&mut router);
        assert_eq!(router.session_count(), 0);

        send(&mut router, &c, &move_to(1.0));
        match c.next() {
            ServerEnvelope::Welcome { player_id, players } => {
                assert_eq!(player_id, c.id);
                assert!(players.is_empty());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        c.assert_silent(); // own move not echoed
        assert_eq!(router.session_count(), 1);

        // A second negotiation-skipping client sees C in its welcome, and C
        // hears the join and the movement.
        let mut d = connect(&mut router);
        send(&mut router, &d, &move_to(2.0));
        match d.next() {
            ServerEnvelope::Welcome { players, .. } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].player_id, c.id);
                assert_eq!(players[0].role, Role::Owner);
                assert_eq!(players[0].position.x, 1.0);
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        assert!(matches!(c.next(), ServerEnvelope::PlayerJoined { .. }));
        match c.next() {
            ServerEnvelope::PlayerMoved { player_id, position, .. } => {
                assert_eq!(player_id, d.id);
                assert_eq!(position.x, 2.0);
            }
            other => panic!("expected player_moved, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_admin_is_limited_to_the_provisioner() {
        let mut router = MessageRouter::new();
        let mut c = connect(&mut router);
        send(&mut router, &c, &move_to(1.0));
        c.next(); // welcome
        let mut d = connect(&mut router);
        send(&mut router, &d, &move_to(2.0));
        d.next(); // welcome
        c.next(); // player_joined
        c.next(); // player_moved

        // Every legacy member holds the owner role, but admin actions key
        // on the owner connection: the provisioner.
        send(
            &mut router,
            &c,
            &ClientEnvelope::UpdateState {
                project_xml: "<scene/>".into(),
            },
        );
        assert_eq!(router.denied_edits(), 0);

        send(
            &mut router,
            &d,
            &ClientEnvelope::UpdateState {
                project_xml: "<hijack/>".into(),
            },
        );
        assert_eq!(router.denied_edits(), 1);
        d.assert_silent();
    }

    #[test]
    fn test_admin_actions_never_auto_provision() {
        let mut router = MessageRouter::new();
        let mut c = connect(&mut router);

        send(
            &mut router,
            &c,
            &ClientEnvelope::UpdateState {
                project_xml: "<scene/>".into(),
            },
        );
        match c.next() {
            ServerEnvelope::SessionError { code, message } => {
                assert_eq!(code, ErrorCode::InvalidMessage);
                assert!(message.contains("not in a session"));
            }
            other => panic!("expected session_error, got {other:?}"),
        }
        assert_eq!(router.session_count(), 0);

        send(
            &mut router,
            &c,
            &ClientEnvelope::LinkPermissionChange {
                link_permission: LinkPermission::View,
            },
        );
        match c.next() {
            ServerEnvelope::SessionError { code, .. } => {
                assert_eq!(code, ErrorCode::InvalidMessage)
            }
            other => panic!("expected session_error, got {other:?}"),
        }
        assert_eq!(router.session_count(), 0);
    }

    #[test]
    fn test_update_state_feeds_future_joiners_only() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(
            &mut router,
            &a,
            &ClientEnvelope::UpdateState {
                project_xml: "<scene version=\"2\"/>".into(),
            },
        );
        // Not rebroadcast, and no sequence consumed.
        b.assert_silent();

        let mut c = connect(&mut router);
        send(
            &mut router,
            &c,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: None,
                user_name: None,
            },
        );
        match c.next() {
            ServerEnvelope::SessionState {
                project_xml,
                sequence_number,
                ..
            } => {
                assert_eq!(project_xml.as_deref(), Some("<scene version=\"2\"/>"));
                assert_eq!(sequence_number, 0);
            }
            other => panic!("expected session_state, got {other:?}"),
        }
    }

    #[test]
    fn test_link_permission_change_reaches_the_whole_roster() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(
            &mut router,
            &a,
            &ClientEnvelope::LinkPermissionChange {
                link_permission: LinkPermission::None,
            },
        );
        // Sender included: its own permission view must update.
        match a.next() {
            ServerEnvelope::LinkPermissionChanged { link_permission } => {
                assert_eq!(link_permission, LinkPermission::None)
            }
            other => panic!("expected link_permission_changed, got {other:?}"),
        }
        assert!(matches!(
            b.next(),
            ServerEnvelope::LinkPermissionChanged { .. }
        ));

        // And the new permission gates future joins.
        let mut late = connect(&mut router);
        send(
            &mut router,
            &late,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: None,
                user_name: None,
            },
        );
        match late.next() {
            ServerEnvelope::SessionError { code, .. } => assert_eq!(code, ErrorCode::NoAccess),
            other => panic!("expected session_error, got {other:?}"),
        }
    }

    #[test]
    fn test_link_permission_change_by_non_owner_is_dropped() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(
            &mut router,
            &b,
            &ClientEnvelope::LinkPermissionChange {
                link_permission: LinkPermission::None,
            },
        );
        a.assert_silent();
        b.assert_silent();
        assert_eq!(router.denied_edits(), 1);

        // The permission is untouched: joining still works.
        join(&mut router, &code);
    }

    #[test]
    fn test_unknown_type_is_dropped_and_malformed_is_an_error() {
        let mut router = MessageRouter::new();
        let mut c = connect(&mut router);

        router.handle_frame(c.id, r#"{"type":"chat_message","text":"hi"}"#);
        c.assert_silent();

        router.handle_frame(c.id, "{broken json");
        assert!(matches!(
            c.next(),
            ServerEnvelope::SessionError {
                code: ErrorCode::InvalidMessage,
                ..
            }
        ));

        router.handle_frame(c.id, r#"{"position":{"x":0,"y":0,"z":0}}"#);
        assert!(matches!(
            c.next(),
            ServerEnvelope::SessionError {
                code: ErrorCode::InvalidMessage,
                ..
            }
        ));

        // Errors are never fatal: the connection remains usable.
        send(
            &mut router,
            &c,
            &ClientEnvelope::CreateSession {
                user_id: None,
                user_name: None,
                project_xml: None,
                link_permission: None,
            },
        );
        assert!(matches!(c.next(), ServerEnvelope::SessionCreated { .. }));
    }

    #[test]
    fn test_pointer_relays_without_sequence_cost() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(
            &mut router,
            &b,
            &ClientEnvelope::Pointer {
                origin: Vec3::new(0.0, 1.6, 0.0),
                target: Vec3::new(1.0, 0.0, 3.0),
            },
        );
        match a.next() {
            ServerEnvelope::Pointer {
                player_id, target, ..
            } => {
                assert_eq!(player_id, b.id);
                assert_eq!(target.z, 3.0);
            }
            other => panic!("expected pointer, got {other:?}"),
        }
        b.assert_silent();

        // Pointer rays consumed no sequence number.
        send(&mut router, &a, &add_f1());
        match b.next() {
            ServerEnvelope::FurnitureAdd { sequence_number, .. } => assert_eq!(sequence_number, 1),
            other => panic!("expected furniture_add, got {other:?}"),
        }
    }

    #[test]
    fn test_move_updates_presence_snapshots() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        send(&mut router, &a, &move_to(3.5));
        a.assert_silent(); // nobody else in the room

        let mut b = connect(&mut router);
        send(
            &mut router,
            &b,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: None,
                user_name: None,
            },
        );
        match b.next() {
            ServerEnvelope::SessionState { presence, .. } => {
                let owner = presence
                    .iter()
                    .find(|p| p.player_id == a.id)
                    .expect("owner in presence");
                assert_eq!(owner.position.x, 3.5);
            }
            other => panic!("expected session_state, got {other:?}"),
        }
    }

    #[test]
    fn test_owner_identity_match_grants_owner_role() {
        let mut router = MessageRouter::new();
        let mut a = connect(&mut router);
        send(
            &mut router,
            &a,
            &ClientEnvelope::CreateSession {
                user_id: Some("u1".into()),
                user_name: None,
                project_xml: None,
                link_permission: Some(LinkPermission::View),
            },
        );
        let code = match a.next() {
            ServerEnvelope::SessionCreated { invite_code, .. } => invite_code,
            other => panic!("expected session_created, got {other:?}"),
        };

        // Same identity token joining from another device: owner role,
        // despite the view-only link.
        let mut b = connect(&mut router);
        send(
            &mut router,
            &b,
            &ClientEnvelope::JoinSession {
                invite_code: code,
                user_id: Some("u1".into()),
                user_name: None,
            },
        );
        match b.next() {
            ServerEnvelope::SessionState { role, .. } => assert_eq!(role, Role::Owner),
            other => panic!("expected session_state, got {other:?}"),
        }

        // Owner role is not the owner connection: admin stays with A.
        send(
            &mut router,
            &b,
            &ClientEnvelope::LinkPermissionChange {
                link_permission: LinkPermission::Edit,
            },
        );
        assert_eq!(router.denied_edits(), 1);
        b.assert_silent();
    }

    #[test]
    fn test_sequence_is_shared_across_edit_types() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let mut b = join(&mut router, &code);
        a.next(); // player_joined

        send(&mut router, &a, &add_f1());
        match b.next() {
            ServerEnvelope::FurnitureAdd { sequence_number, .. } => assert_eq!(sequence_number, 1),
            other => panic!("expected furniture_add, got {other:?}"),
        }

        send(
            &mut router,
            &b,
            &ClientEnvelope::MaterialChange {
                target_id: "wall-1".into(),
                target_type: "wall".into(),
                material_path: "paint/red".into(),
                category_id: None,
            },
        );
        match a.next() {
            ServerEnvelope::MaterialChange { sequence_number, .. } => assert_eq!(sequence_number, 2),
            other => panic!("expected material_change, got {other:?}"),
        }

        send(
            &mut router,
            &a,
            &ClientEnvelope::FurnitureChangeVariation {
                furniture_id: "f1".into(),
                variation_path: "chairs/02".into(),
            },
        );
        match b.next() {
            ServerEnvelope::FurnitureChangeVariation { sequence_number, .. } => {
                assert_eq!(sequence_number, 3)
            }
            other => panic!("expected furniture_change_variation, got {other:?}"),
        }

        send(
            &mut router,
            &b,
            &ClientEnvelope::FurnitureRemove {
                furniture_id: "f1".into(),
            },
        );
        match a.next() {
            ServerEnvelope::FurnitureRemove { sequence_number, .. } => {
                assert_eq!(sequence_number, 4)
            }
            other => panic!("expected furniture_remove, got {other:?}"),
        }
    }

    #[test]
    fn test_non_owner_disconnect_leaves_session_intact() {
        let mut router = MessageRouter::new();
        let (mut a, code) = create_session(&mut router, LinkPermission::Edit);
        let b = join(&mut router, &code);
        a.next(); // player_joined

        router.disconnect(b.id);
        match a.next() {
            ServerEnvelope::PlayerLeft { player_id } => assert_eq!(player_id, b.id),
            other => panic!("expected player_left, got {other:?}"),
        }
        assert_eq!(router.session_count(), 1);
        assert_eq!(router.connection_count(), 1);
    }

    #[test]
    fn test_legacy_session_removed_when_empty() {
        let mut router = MessageRouter::new();
        let mut c = connect(&mut router);
        send(&mut router, &c, &move_to(1.0));
        c.next(); // welcome
        assert_eq!(router.session_count(), 1);

        router.disconnect(c.id);
        assert_eq!(router.session_count(), 0);

        // The next negotiation-skipping client gets a fresh room.
        let mut d = connect(&mut router);
        send(&mut router, &d, &move_to(2.0));
        match d.next() {
            ServerEnvelope::Welcome { players, .. } => assert!(players.is_empty()),
            other => panic!("expected welcome, got {other:?}"),
        }
        assert_eq!(router.session_count(), 1);
    }

    #[test]
    fn test_legacy_session_full_notifies_the_sender() {
        let mut router = MessageRouter::new();
        for _ in 0..MAX_ROSTER {
            let mut c = connect(&mut router);
            send(&mut router, &c, &move_to(0.0));
            assert!(matches!(c.next(), ServerEnvelope::Welcome { .. }));
        }

        // The fallback path hits the same roster cap as explicit joins.
        let mut late = connect(&mut router);
        send(&mut router, &late, &move_to(0.0));
        match late.next() {
            ServerEnvelope::SessionError { code, .. } => assert_eq!(code, ErrorCode::SessionFull),
            other => panic!("expected session_error, got {other:?}"),
        }
    }

    #[test]
    fn test_bot_players_seed_legacy_welcome() {
        let mut router = MessageRouter::with_bots(Box::new(PathReplayBots::new(2)));
        let mut c = connect(&mut router);
        send(&mut router, &c, &move_to(1.0));
        match c.next() {
            ServerEnvelope::Welcome { players, .. } => {
                assert_eq!(players.len(), 2);
                assert!(players.iter().all(|p| p.player_id >= BOT_ID_BASE));
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[test]
    fn test_tick_relays_bot_movement_to_all_connections() {
        let mut router = MessageRouter::with_bots(Box::new(PathReplayBots::new(1)));
        let mut c = connect(&mut router);
        send(&mut router, &c, &move_to(0.0));
        c.next(); // welcome
        for i in 1..=60 {
            send(&mut router, &c, &move_to(i as f32));
        }

        // A connection outside any session still hears bot broadcasts.
        let mut d = connect(&mut router);
        router.handle_tick();

        match c.next() {
            ServerEnvelope::PlayerMoved { player_id, .. } => assert!(player_id >= BOT_ID_BASE),
            other => panic!("expected player_moved, got {other:?}"),
        }
        match d.next() {
            ServerEnvelope::PlayerMoved { player_id, .. } => assert!(player_id >= BOT_ID_BASE),
            other => panic!("expected player_moved, got {other:?}"),
        }
    }
}
