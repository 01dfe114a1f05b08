//! Environment variable helpers shared by the config resolvers.

use std::str::FromStr;

use crate::error::ConfigError;

/// Read an optional environment variable, treating empty as unset.
pub fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

/// Read a required environment variable.
pub fn require_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

/// Read and parse an optional environment variable, falling back to a default.
pub fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses a unique variable name; the test runner shares one
    // process environment.

    #[test]
    fn test_optional_env_empty_is_none() {
        unsafe { std::env::set_var("MANAFORGE_TEST_EMPTY", "   ") };
        assert_eq!(optional_env("MANAFORGE_TEST_EMPTY").unwrap(), None);
        unsafe { std::env::remove_var("MANAFORGE_TEST_EMPTY") };
    }

    #[test]
    fn test_require_env_missing_carries_hint() {
        let err = require_env("MANAFORGE_TEST_ABSENT", "set it in .env").unwrap_err();
        assert!(err.to_string().contains("set it in .env"));
    }

    #[test]
    fn test_parse_optional_env_default_and_parse() {
        assert_eq!(
            parse_optional_env("MANAFORGE_TEST_UNSET_U64", 7u64).unwrap(),
            7
        );
        unsafe { std::env::set_var("MANAFORGE_TEST_SET_U64", "42") };
        assert_eq!(
            parse_optional_env("MANAFORGE_TEST_SET_U64", 7u64).unwrap(),
            42
        );
        unsafe { std::env::set_var("MANAFORGE_TEST_BAD_U64", "many") };
        assert!(parse_optional_env("MANAFORGE_TEST_BAD_U64", 7u64).is_err());
        unsafe {
            std::env::remove_var("MANAFORGE_TEST_SET_U64");
            std::env::remove_var("MANAFORGE_TEST_BAD_U64");
        }
    }
}
