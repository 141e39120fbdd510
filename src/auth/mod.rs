//! Authentication contexts.
//!
//! The three shared-secret contexts share the `authenticate` tag on the wire
//! but never share state: `main_auth` only flips the session's platform-access
//! flag, while `admin_access` and `mod_auth` assign a role.

pub mod accounts;
mod authz;
mod password;

use serde::{Deserialize, Serialize};

use crate::{config::Config, session::Role};

pub use accounts::AccountResolution;
pub use authz::{authorize, required_role, Privileged};
pub use password::{hash_password, verify_password};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthContext {
    MainAuth,
    AdminAccess,
    ModAuth,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "context", rename_all = "snake_case")]
pub enum AuthRequest {
    MainAuth { key: String },
    AdminAccess { password: String },
    ModAuth { role: String, password: String },
}

impl AuthRequest {
    pub fn context(&self) -> AuthContext {
        match self {
            AuthRequest::MainAuth { .. } => AuthContext::MainAuth,
            AuthRequest::AdminAccess { .. } => AuthContext::AdminAccess,
            AuthRequest::ModAuth { .. } => AuthContext::ModAuth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Platform access granted; role unchanged.
    Authenticated,
    Granted(Role),
    Denied,
}

/// Shared secrets for the three contexts.
#[derive(Debug, Clone)]
pub struct Credentials {
    encryption_key: String,
    admin_access_code: String,
    moderators: Vec<(String, String, Role)>,
}

impl Credentials {
    pub fn from_config(config: &Config) -> Self {
        Credentials {
            encryption_key: config.encryption_key.clone(),
            admin_access_code: config.admin_access_code.clone(),
            moderators: config
                .moderators
                .iter()
                .map(|m| (m.name.clone(), m.password.clone(), m.role))
                .collect(),
        }
    }

    pub fn check(&self, request: &AuthRequest) -> AuthOutcome {
        match request {
            AuthRequest::MainAuth { key } if *key == self.encryption_key => AuthOutcome::Authenticated,
            AuthRequest::AdminAccess { password } if *password == self.admin_access_code => {
                AuthOutcome::Granted(Role::Admin)
            }
            AuthRequest::ModAuth { role, password } => self
                .moderators
                .iter()
                .find(|(name, secret, _)| name == role && secret == password)
                .map_or(AuthOutcome::Denied, |(_, _, granted)| AuthOutcome::Granted(*granted)),
            _ => AuthOutcome::Denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::from_config(&Config::default())
    }

    #[test]
    fn main_auth_grants_access_without_role() {
        let outcome = credentials().check(&AuthRequest::MainAuth { key: "BOLT_ANONYMOUS_2025".into() });
        assert_eq!(outcome, AuthOutcome::Authenticated);
    }

    #[test]
    fn admin_access_grants_admin() {
        let outcome = credentials().check(&AuthRequest::AdminAccess { password: "ADMIN_BOLT_2025".into() });
        assert_eq!(outcome, AuthOutcome::Granted(Role::Admin));
    }

    #[test]
    fn contexts_do_not_accept_each_others_secrets() {
        let creds = credentials();
        assert_eq!(creds.check(&AuthRequest::MainAuth { key: "ADMIN_BOLT_2025".into() }), AuthOutcome::Denied);
        assert_eq!(creds.check(&AuthRequest::AdminAccess { password: "BOLT_ANONYMOUS_2025".into() }), AuthOutcome::Denied);
    }

    #[test]
    fn mod_auth_requires_matching_name_and_password() {
        let creds = credentials();
        let ok = creds.check(&AuthRequest::ModAuth { role: "mod".into(), password: "mod123".into() });
        assert_eq!(ok, AuthOutcome::Granted(Role::Moderator));

        let wrong_name = creds.check(&AuthRequest::ModAuth { role: "moderator".into(), password: "mod123".into() });
        assert_eq!(wrong_name, AuthOutcome::Denied);

        let unknown = creds.check(&AuthRequest::ModAuth { role: "root".into(), password: "mod123".into() });
        assert_eq!(unknown, AuthOutcome::Denied);
    }

    #[test]
    fn mod_auth_admin_name_grants_admin() {
        let outcome = credentials().check(&AuthRequest::ModAuth { role: "admin".into(), password: "admin123".into() });
        assert_eq!(outcome, AuthOutcome::Granted(Role::Admin));
    }
}
