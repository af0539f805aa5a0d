//! # maquette-collab — Real-time co-editing relay for Maquette scenes
//!
//! A websocket relay that lets several clients walk through and furnish the
//! same 3D scene together: avatar movement, pointer rays, and furniture
//! edits fan out to everyone else in the session, with invite codes keeping
//! concurrent sessions isolated.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    WebSocket      ┌─────────────────────────────┐
//! │ RelayClient │ ◄────────────────► │ RelayServer                 │
//! │ (per user)  │    JSON frames     │ (accept loop + conn tasks)  │
//! └─────────────┘                   └──────────────┬──────────────┘
//!                                                  │ commands (mpsc)
//!                                                  ▼
//!                                   ┌─────────────────────────────┐
//!                                   │ MessageRouter (actor task)  │
//!                                   │   ConnectionRegistry        │
//!                                   │   SessionRegistry           │
//!                                   │   AuthorizationPolicy       │
//!                                   │   BroadcastEngine (fan-out) │
//!                                   │   BotBridge (optional)      │
//!                                   └─────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (tagged envelopes)
//! - [`session`] — sessions, rosters, roles, invite codes
//! - [`auth`] — action classes and the role policy
//! - [`registry`] — connection and session bookkeeping
//! - [`broadcast`] — serialize-once fan-out
//! - [`router`] — per-message dispatch and relay semantics
//! - [`server`] — websocket front end and the router actor
//! - [`client`] — websocket client for tests and tooling
//! - [`bot`] — optional simulated players

pub mod protocol;
pub mod session;
pub mod auth;
pub mod registry;
pub mod broadcast;
pub mod router;
pub mod server;
pub mod client;
pub mod bot;

// Re-exports for convenience
pub use auth::{Action, ActionClass, AuthorizationPolicy};
pub use bot::{BotBridge, NoBots, PathReplayBots, BOT_ID_BASE};
pub use broadcast::{BroadcastEngine, BroadcastStats};
pub use client::{ConnectionState, RelayClient};
pub use protocol::{
    ClientEnvelope, ClientId, Decoded, ErrorCode, LinkPermission, PlayerSnapshot, ProtocolError,
    Role, Rotation, ServerEnvelope, SessionId, Vec3,
};
pub use registry::{ConnectionRegistry, JoinError, LeaveOutcome, SessionRegistry};
pub use router::MessageRouter;
pub use server::{RelayConfig, RelayError, RelayServer, RelayStats};
pub use session::{Player, Session, MAX_ROSTER};
