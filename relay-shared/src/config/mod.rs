//! Layered TOML configuration.
//!
//! Loading order (lowest to highest precedence), following a
//! `config/{base,environments}` convention:
//!
//! 1. `config/relay/base.toml` — defaults checked into the repo.
//! 2. `config/relay/environments/{RELAY_ENV}.toml` — per-environment overrides,
//!    `RELAY_ENV` defaulting to `development`.
//! 3. Environment variables prefixed `RELAY__`, double-underscore-separated
//!    (`RELAY__DATABASE__POOL_SIZE=20` overrides `database.pool_size`).
//!
//! Call [`RelayConfig::load`] once at start-up and pass the resulting struct down —
//! nothing in this crate reads environment variables or files outside this module.

pub mod chat;
pub mod database;
pub mod messaging;
pub mod scheduler;

use serde::Deserialize;

pub use chat::ChatConfig;
pub use database::DatabaseConfig;
pub use messaging::MessagingConfig;
pub use scheduler::SchedulerConfig;

use crate::error::RelayResult;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub database: DatabaseConfig,
    pub messaging: MessagingConfig,
    pub scheduler: SchedulerConfig,
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from `config/relay/base.toml`, layered with
    /// `config/relay/environments/{env}.toml` and `RELAY__`-prefixed env vars.
    pub fn load() -> RelayResult<Self> {
        let env = std::env::var("RELAY_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/relay/base").required(false))
            .add_source(
                config::File::with_name(&format!("config/relay/environments/{env}"))
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_are_sane() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.shutdown_timeout_ms, 30_000);
    }
}
