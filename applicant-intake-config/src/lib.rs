use core::fmt::{Debug, Display};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "intake.toml";
pub const ENV_PREFIX: &str = "INTAKE_";

/// Where application records are kept.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store, lost on restart. Meant for local development.
    Memory,
    /// Hosted realtime database reached over its REST interface.
    Firebase {
        database_url: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
}

/// One allow-listed admin. Plain text on purpose: the login gate is not a security boundary.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AdminPrincipal {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    pub store: StoreConfig,
    pub admins: Vec<AdminPrincipal>,
    /// How long the success banner stays visible after a submission.
    pub banner_seconds: u64,
    /// Idle time after which a visitor's form and dashboard are torn down.
    pub view_idle_seconds: u64,
    /// How long the first dashboard render waits for the initial snapshot.
    pub initial_load_millis: u64,
    /// Mark the session cookie `Secure`. Only enable behind https.
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3000)),
            store: StoreConfig::Memory,
            admins: Vec::new(),
            banner_seconds: 3,
            view_idle_seconds: 30 * 60,
            initial_load_millis: 2000,
            secure_cookies: false,
        }
    }
}

#[derive(thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] figment::Error),
}

impl Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Config {
    #[must_use]
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

pub fn get_config() -> Result<Config, ConfigError> {
    Ok(Config::figment().extract()?)
}
