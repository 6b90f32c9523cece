//! Small env-var parsing helpers shared by every config sub-module, grounded on the
//! teacher's `config/risk_env_config.rs` `parse_f64`/`parse_usize`/`parse_bool` family.

use crate::domain::errors::EngineError;
use std::env;
use std::str::FromStr;

pub fn parse<T: FromStr>(key: &str, default: T) -> Result<T, EngineError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| {
            EngineError::config("config.from_env", None, format!("failed to parse {key}: {e}"))
        }),
        Err(_) => Ok(default),
    }
}

pub fn string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn required_string(key: &str) -> Result<String, EngineError> {
    env::var(key)
        .map_err(|_| EngineError::config("config.from_env", None, format!("missing required key: {key}")))
}
