use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::AppError;

/// Who is performing the request. Session handling lives in the platform's
/// auth service; by the time a request reaches this engine the gateway has
/// resolved it to a role and an id carried in headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    Courier,
    Customer,
    System,
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub role: Role,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let role = match headers.get("x-actor-role").and_then(|v| v.to_str().ok()) {
            Some("manager") => Role::Manager,
            Some("courier") => Role::Courier,
            Some("customer") => Role::Customer,
            Some("system") | None => Role::System,
            Some(other) => {
                return Err(AppError::Validation(format!("unknown actor role: {other}")));
            }
        };

        let id = match headers.get("x-actor-id").and_then(|v| v.to_str().ok()) {
            Some(raw) => Some(
                raw.parse::<Uuid>()
                    .map_err(|_| AppError::Validation("x-actor-id must be a uuid".to_string()))?,
            ),
            None => None,
        };

        Ok(Self { role, id })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateDelivery,
    AssignDelivery,
    TransitionDelivery,
    ReportLocation,
    SubmitProof,
    TipDelivery,
    RateDelivery,
    PostChatMessage,
    ManageCouriers,
    ManageShift,
    RunPayouts,
}

/// Central role table consulted before every mutating operation. Handlers
/// never hand-roll role checks.
pub fn require(actor: &Actor, capability: Capability) -> Result<(), AppError> {
    let allowed = match capability {
        Capability::CreateDelivery => matches!(actor.role, Role::Manager | Role::System),
        Capability::AssignDelivery => matches!(actor.role, Role::Manager | Role::System),
        Capability::TransitionDelivery => {
            matches!(actor.role, Role::Manager | Role::System | Role::Courier)
        }
        Capability::ReportLocation => matches!(actor.role, Role::Courier | Role::System),
        Capability::SubmitProof => matches!(actor.role, Role::Courier | Role::System),
        Capability::TipDelivery => matches!(actor.role, Role::Customer | Role::System),
        Capability::RateDelivery => matches!(actor.role, Role::Customer | Role::System),
        Capability::PostChatMessage => {
            matches!(actor.role, Role::Courier | Role::Customer | Role::Manager)
        }
        Capability::ManageCouriers => matches!(actor.role, Role::Manager | Role::System),
        Capability::ManageShift => {
            matches!(actor.role, Role::Courier | Role::Manager | Role::System)
        }
        Capability::RunPayouts => matches!(actor.role, Role::Manager | Role::System),
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role is not allowed to {capability:?}"
        )))
    }
}

/// A courier may only act on the delivery currently assigned to them.
/// Managers and the system bypass the ownership check.
pub fn require_assignee(
    actor: &Actor,
    assigned_courier: Option<Uuid>,
) -> Result<(), AppError> {
    match actor.role {
        Role::Manager | Role::System => Ok(()),
        Role::Courier => match (actor.id, assigned_courier) {
            (Some(actor_id), Some(courier_id)) if actor_id == courier_id => Ok(()),
            _ => Err(AppError::Forbidden(
                "delivery is not assigned to this courier".to_string(),
            )),
        },
        Role::Customer => Err(AppError::Forbidden(
            "customers cannot perform courier actions".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{Actor, Capability, Role, require, require_assignee};

    #[test]
    fn customer_cannot_assign_deliveries() {
        let actor = Actor {
            role: Role::Customer,
            id: Some(Uuid::new_v4()),
        };
        assert!(require(&actor, Capability::AssignDelivery).is_err());
    }

    #[test]
    fn courier_can_report_location_only_for_own_delivery() {
        let courier_id = Uuid::new_v4();
        let actor = Actor {
            role: Role::Courier,
            id: Some(courier_id),
        };

        assert!(require_assignee(&actor, Some(courier_id)).is_ok());
        assert!(require_assignee(&actor, Some(Uuid::new_v4())).is_err());
        assert!(require_assignee(&actor, None).is_err());
    }

    #[test]
    fn manager_bypasses_ownership() {
        let actor = Actor {
            role: Role::Manager,
            id: None,
        };
        assert!(require_assignee(&actor, Some(Uuid::new_v4())).is_ok());
    }
}
