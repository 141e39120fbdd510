use crate::{error::HubError, session::Role};

/// Inbound operations that need more than a plain viewer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privileged {
    DeleteMessage,
    AdminAction,
    AdminCommand,
}

const AUTHORIZATION: [(Privileged, Role); 3] = [
    (Privileged::DeleteMessage, Role::Moderator),
    (Privileged::AdminAction, Role::Moderator),
    (Privileged::AdminCommand, Role::Admin),
];

pub fn required_role(operation: Privileged) -> Role {
    AUTHORIZATION
        .iter()
        .find(|(op, _)| *op == operation)
        .map_or(Role::Admin, |(_, role)| *role)
}

pub fn authorize(operation: Privileged, role: Role) -> Result<(), HubError> {
    if role >= required_role(operation) {
        Ok(())
    } else {
        Err(HubError::Authorization)
    }
}
