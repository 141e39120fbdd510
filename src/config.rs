use std::str::FromStr;

use crate::{error::ConfigError, session::Role};

/// A named moderator credential for the `mod_auth` context.
#[derive(Debug, Clone)]
pub struct ModeratorCredential {
    pub name: String,
    pub password: String,
    pub role: Role,
}

/// Environment-level configuration. Every key has a default so the hub runs
/// without a `.env` file.
#[derive(Debug, Clone)]
pub struct Config {
    pub encryption_key: String,
    pub admin_access_code: String,
    pub moderators: Vec<ModeratorCredential>,
    pub bind_addr: String,
    pub port: u16,
    pub database_url: String,
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let moderator = |name: &str, key: &str, default: &str, role: Role| ModeratorCredential {
            name: name.to_owned(),
            password: var_or(key, default),
            role,
        };

        Ok(Config {
            encryption_key: var_or("ENCRYPTION_KEY", "BOLT_ANONYMOUS_2025"),
            admin_access_code: var_or("ADMIN_ACCESS_CODE", "ADMIN_BOLT_2025"),
            moderators: vec![
                moderator("mod", "MOD_PASSWORD", "mod123", Role::Moderator),
                moderator("moderator", "MODERATOR_PASSWORD", "moderator123", Role::Moderator),
                moderator("admin", "ADMIN_PASSWORD", "admin123", Role::Admin),
            ],
            bind_addr: var_or("BIND_ADDR", "0.0.0.0"),
            port: parse_var("WS_PORT", 3001)?,
            database_url: var_or("DATABASE_URL", "sqlite://data/streamhub.sqlite?mode=rwc"),
            webhook_url: dotenv::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            encryption_key: "BOLT_ANONYMOUS_2025".to_owned(),
            admin_access_code: "ADMIN_BOLT_2025".to_owned(),
            moderators: vec![
                ModeratorCredential { name: "mod".to_owned(), password: "mod123".to_owned(), role: Role::Moderator },
                ModeratorCredential { name: "moderator".to_owned(), password: "moderator123".to_owned(), role: Role::Moderator },
                ModeratorCredential { name: "admin".to_owned(), password: "admin123".to_owned(), role: Role::Admin },
            ],
            bind_addr: "0.0.0.0".to_owned(),
            port: 3001,
            database_url: "sqlite::memory:".to_owned(),
            webhook_url: None,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match dotenv::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_moderators_cover_every_named_role() {
        let config = Config::default();
        let names: Vec<_> = config.moderators.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["mod", "moderator", "admin"]);
        assert_eq!(config.moderators[2].role, Role::Admin);
    }

    #[test]
    fn listen_addr_joins_host_and_port() {
        let config = Config { bind_addr: "127.0.0.1".into(), port: 4000, ..Config::default() };
        assert_eq!(config.listen_addr(), "127.0.0.1:4000");
    }
}
