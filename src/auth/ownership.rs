use serde::Serialize;
use uuid::Uuid;

use super::ResourceAuthorizer;
use crate::error::AuthError;
use crate::models::Principal;

/// What the caller wants to do with an owned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Owner,
    AdminOverride,
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    pub allow: bool,
    pub reason: DecisionReason,
}

impl AuthorizationDecision {
    /// A denial becomes `OwnershipDenied`, which renders as "not found".
    pub fn into_result(self) -> Result<(), AuthError> {
        if self.allow {
            Ok(())
        } else {
            Err(AuthError::OwnershipDenied)
        }
    }
}

/// Per-resource ownership check. Pure: no I/O, no state beyond its construction flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipGuard {
    admin_override: bool,
}

impl OwnershipGuard {
    /// Owners only.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Also lets principals carrying the explicit admin flag through.
    pub fn with_admin_override() -> Self {
        Self {
            admin_override: true,
        }
    }

    pub fn authorize(
        &self,
        principal: &Principal,
        owner_id: Uuid,
        action: Action,
    ) -> AuthorizationDecision {
        let decision = if principal.id == owner_id {
            AuthorizationDecision {
                allow: true,
                reason: DecisionReason::Owner,
            }
        } else if self.admin_override && principal.is_admin {
            AuthorizationDecision {
                allow: true,
                reason: DecisionReason::AdminOverride,
            }
        } else {
            AuthorizationDecision {
                allow: false,
                reason: DecisionReason::NotOwner,
            }
        };

        if decision.reason != DecisionReason::Owner {
            log::debug!(
                "{:?} on resource owned by {} by {}: {:?}",
                action,
                owner_id,
                principal.id,
                decision.reason
            );
        }
        decision
    }
}

impl ResourceAuthorizer for OwnershipGuard {
    fn authorize(&self, principal: &Principal, owner_id: Uuid) -> bool {
        OwnershipGuard::authorize(self, principal, owner_id, Action::Read).allow
    }
}
