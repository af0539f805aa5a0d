//! JSON wire protocol for the relay.
//!
//! Every frame is a single JSON object carrying a `type` tag:
//!
//! ```text
//! {"type":"furniture_add","furnitureId":"f1","variationPath":"chairs/01", …}
//! ```
//!
//! Tags are snake_case, field names camelCase. Client→server and
//! server→client envelopes are separate closed enums so the router can match
//! exhaustively. Decoding an inbound frame has three outcomes, and the
//! distinction matters to the router:
//!
//! - a typed [`ClientEnvelope`] — dispatched to exactly one handler;
//! - a well-formed object whose `type` is not one of ours — dropped, not an
//!   error (forward compatibility with newer clients);
//! - anything else (bad JSON, missing `type`, bad fields) — `INVALID_MESSAGE`
//!   back to the sender.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Server-assigned connection id. Starts at 1, strictly increasing, never
/// reused for the lifetime of the process.
pub type ClientId = u64;

/// Opaque session id, globally unique.
pub type SessionId = Uuid;

/// Position in scene (world) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Avatar/furniture orientation. Yaw only; clients that send more axes are
/// tolerated (serde ignores unknown fields) but only yaw is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub y: f32,
}

impl Rotation {
    pub fn yaw(y: f32) -> Self {
        Self { y }
    }
}

/// Who may follow the invite link into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPermission {
    Edit,
    View,
    None,
}

/// A player's authorization level within a session.
///
/// Derived once at join time (see `session::derive_role`) and immutable
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Owner,
    CoAuthor,
    GuestEdit,
    GuestView,
}

/// Roster entry as it appears in `welcome.players` and
/// `session_state.presence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub player_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub display_name: String,
    pub role: Role,
    pub position: Vec3,
    pub rotation: Rotation,
}

/// Error codes delivered in `session_error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed payload, missing type, or an explicit-session action
    /// attempted with no session.
    InvalidMessage,
    AlreadyInSession,
    /// Unknown invite code.
    NotFound,
    /// Link permission is `none`.
    NoAccess,
    /// Roster at capacity.
    SessionFull,
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
    CreateSession {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_xml: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_permission: Option<LinkPermission>,
    },
    JoinSession {
        invite_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    LeaveSession,
    Move {
        position: Vec3,
        rotation: Rotation,
    },
    Pointer {
        origin: Vec3,
        target: Vec3,
    },
    FurnitureAdd {
        furniture_id: String,
        variation_path: String,
        position: Vec3,
        rotation: Rotation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plane_offset: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
    },
    FurnitureRemove {
        furniture_id: String,
    },
    FurnitureMove {
        furniture_id: String,
        position: Vec3,
        rotation: Rotation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plane_offset: Option<f32>,
        /// Mid-drag previews arrive with `committed == false`; only the
        /// final placement consumes a sequence number.
        #[serde(default)]
        committed: bool,
    },
    FurnitureChangeVariation {
        furniture_id: String,
        variation_path: String,
    },
    MaterialChange {
        target_id: String,
        target_type: String,
        material_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category_id: Option<String>,
    },
    UpdateState {
        project_xml: String,
    },
    LinkPermissionChange {
        link_permission: LinkPermission,
    },
}

/// Every tag [`ClientEnvelope`] can decode. A frame whose tag is absent from
/// this list is recognized-but-unknown and silently dropped by the router.
const CLIENT_TAGS: [&str; 12] = [
    "create_session",
    "join_session",
    "leave_session",
    "move",
    "pointer",
    "furniture_add",
    "furniture_remove",
    "furniture_move",
    "furniture_change_variation",
    "material_change",
    "update_state",
    "link_permission_change",
];

/// Outcome of decoding an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(ClientEnvelope),
    /// Well-formed JSON object with a `type` we do not recognize.
    Unknown(String),
}

impl ClientEnvelope {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Decode an inbound text frame, distinguishing unknown tags from
    /// malformed payloads.
    pub fn decode(text: &str) -> Result<Decoded, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?;
        if !CLIENT_TAGS.contains(&tag) {
            return Ok(Decoded::Unknown(tag.to_owned()));
        }
        let envelope = serde_json::from_value(value)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Decoded::Envelope(envelope))
    }
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEnvelope {
    /// Legacy path only: reply to a client auto-joined into the legacy
    /// session. `players` seeds the joiner's roster (other members plus
    /// simulated players); the joiner learns its own id from `player_id`.
    Welcome {
        player_id: ClientId,
        players: Vec<PlayerSnapshot>,
    },
    SessionCreated {
        invite_code: String,
        session_id: SessionId,
        sequence_number: u64,
        player_id: ClientId,
    },
    /// Full snapshot sent to a joiner, who missed all prior incremental
    /// edits. `presence` includes the joiner itself.
    SessionState {
        project_xml: Option<String>,
        sequence_number: u64,
        presence: Vec<PlayerSnapshot>,
        role: Role,
        player_id: ClientId,
    },
    PlayerJoined {
        player: PlayerSnapshot,
    },
    PlayerMoved {
        player_id: ClientId,
        position: Vec3,
        rotation: Rotation,
    },
    PlayerLeft {
        player_id: ClientId,
    },
    Pointer {
        player_id: ClientId,
        origin: Vec3,
        target: Vec3,
    },
    FurnitureAdd {
        player_id: ClientId,
        furniture_id: String,
        variation_path: String,
        position: Vec3,
        rotation: Rotation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plane_offset: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        sequence_number: u64,
    },
    FurnitureRemove {
        player_id: ClientId,
        furniture_id: String,
        sequence_number: u64,
    },
    /// Sequence number present only when the move was committed; previews
    /// relay without one.
    FurnitureMove {
        player_id: ClientId,
        furniture_id: String,
        position: Vec3,
        rotation: Rotation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plane_offset: Option<f32>,
        committed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<u64>,
    },
    FurnitureChangeVariation {
        player_id: ClientId,
        furniture_id: String,
        variation_path: String,
        sequence_number: u64,
    },
    MaterialChange {
        player_id: ClientId,
        target_id: String,
        target_type: String,
        material_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category_id: Option<String>,
        sequence_number: u64,
    },
    LinkPermissionChanged {
        link_permission: LinkPermission,
    },
    SessionClosed {
        reason: String,
    },
    SessionError {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEnvelope {
    /// Build a `session_error` envelope.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEnvelope::SessionError {
            code,
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Decode a server frame (client side).
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope has no type field")]
    MissingType,
    #[error("serialization failed: {0}")]
    Serialize(String),
    #[error("connection closed")]
    ConnectionClosed,
}
