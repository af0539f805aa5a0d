//! Authorization policy: a pure (role, action) table consulted before every
//! mutating handler runs.
//!
//! Denied attempts are silent on the wire — no `session_error` goes back,
//! the action simply has no effect. The router counts and logs them instead.
//! Do not "fix" this asymmetry: clients probe for permissions and must not
//! get an oracle.

use crate::protocol::Role;

/// Every mutating message the router authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move,
    Pointer,
    FurnitureAdd,
    FurnitureRemove,
    FurnitureMove,
    FurnitureChangeVariation,
    MaterialChange,
    UpdateState,
    LinkPermissionChange,
}

/// Coarse grouping the permission table is written in terms of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Movement and pointer rays: any roster member.
    Presence,
    /// Scene edits: anyone with an editing role.
    Edit,
    /// Full-state push and link-permission change: the owner connection
    /// only. The router additionally requires `client_id ==
    /// owner_client_id`, not just the owner role.
    Admin,
}

impl Action {
    pub fn class(self) -> ActionClass {
        match self {
            Action::Move | Action::Pointer => ActionClass::Presence,
            Action::FurnitureAdd
            | Action::FurnitureRemove
            | Action::FurnitureMove
            | Action::FurnitureChangeVariation
            | Action::MaterialChange => ActionClass::Edit,
            Action::UpdateState | Action::LinkPermissionChange => ActionClass::Admin,
        }
    }
}

/// The (role, action) → permitted mapping. Stateless; one instance is
/// threaded through the router so tests can swap the seam if they ever need
/// to.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationPolicy;

impl AuthorizationPolicy {
    pub fn permits(&self, role: Role, action: Action) -> bool {
        match action.class() {
            ActionClass::Presence => true,
            ActionClass::Edit => {
                matches!(role, Role::Owner | Role::CoAuthor | Role::GuestEdit)
            }
            ActionClass::Admin => matches!(role, Role::Owner),
        }
    }
}
