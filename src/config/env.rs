use std::fmt::Display;
use std::str::FromStr;

use super::ConfigError;

/// Read an environment variable, treating blank values as unset.
pub(super) fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an optional environment variable.
pub(super) fn parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ConfigError::invalid(name, format!("'{raw}': {e}")))
        })
        .transpose()
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
pub(super) fn parse_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(
            name,
            format!("'{raw}' is not a boolean"),
        )),
    }
}
