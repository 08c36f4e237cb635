use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serenity::model::id::{RoleId, UserId};
use thiserror::Error;

use crate::music::controller::DEFAULT_VOLUME;
use crate::music::resolver::DEFAULT_TIMEOUT;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Expected {0} in the environment")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub prefix: String,
    pub dj_users: Vec<UserId>,
    pub dj_roles: Vec<RoleId>,
    pub owner: Option<UserId>,
    pub library_path: PathBuf,
    pub paste_url: String,
    pub resolve_timeout: Duration,
    pub default_volume: f32,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let token = read("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let resolve_timeout = match read("RESOLVE_TIMEOUT_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(invalid("RESOLVE_TIMEOUT_SECS", value)),
            },
            None => DEFAULT_TIMEOUT,
        };

        let default_volume = match read("DEFAULT_VOLUME") {
            Some(value) => match value.parse::<f32>() {
                Ok(volume) if (0.0..=1.0).contains(&volume) => volume,
                _ => return Err(invalid("DEFAULT_VOLUME", value)),
            },
            None => DEFAULT_VOLUME,
        };

        let dj_users = id_list("DJ_USER_IDS", read("DJ_USER_IDS"))?;
        let dj_roles = id_list("DJ_ROLE_IDS", read("DJ_ROLE_IDS"))?;

        Ok(Config {
            token,
            prefix: read("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string()),
            dj_users: dj_users.into_iter().map(UserId).collect(),
            dj_roles: dj_roles.into_iter().map(RoleId).collect(),
            owner: match read("OWNER_ID") {
                Some(value) => Some(UserId(value.parse().map_err(|_| invalid("OWNER_ID", value))?)),
                None => None,
            },
            library_path: read("LIBRARY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("music_library.json")),
            paste_url: read("PASTE_URL").unwrap_or_else(|| "https://hastebin.com".to_string()),
            resolve_timeout,
            default_volume,
        })
    }
}

fn invalid(name: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { name, value }
}

fn id_list<T: FromStr>(name: &'static str, value: Option<String>) -> Result<Vec<T>, ConfigError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse::<T>().map_err(|_| invalid(name, id.to_string())))
        .collect()
}
