//! Environment variable parsing utilities

use std::str::FromStr;

/// Parse an environment variable with a default fallback
///
/// A value that is present but unparseable also falls back to the default.
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    parse_env_optional(key).unwrap_or(default)
}

/// Parse an environment variable, returning None if missing or invalid
pub fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read a required environment variable
pub fn require_env(key: &str) -> Result<String, String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => Err(format!("Environment variable {} is empty", key)),
        Err(_) => Err(format!("Environment variable {} not set", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_parse_env_with_default() {
        std::env::set_var("DB_POOL_TEST_NUM", " 42 ");
        assert_eq!(parse_env_with_default::<u32>("DB_POOL_TEST_NUM", 7), 42);

        std::env::set_var("DB_POOL_TEST_NUM", "not-a-number");
        assert_eq!(parse_env_with_default::<u32>("DB_POOL_TEST_NUM", 7), 7);

        std::env::remove_var("DB_POOL_TEST_NUM");
        assert_eq!(parse_env_with_default::<u32>("DB_POOL_TEST_NUM", 7), 7);
    }

    #[test]
    #[serial_test::serial]
    fn test_require_env() {
        std::env::remove_var("DB_POOL_TEST_REQUIRED");
        assert!(require_env("DB_POOL_TEST_REQUIRED").is_err());

        std::env::set_var("DB_POOL_TEST_REQUIRED", "  ");
        assert!(require_env("DB_POOL_TEST_REQUIRED").is_err());

        std::env::set_var("DB_POOL_TEST_REQUIRED", "postgres://localhost/audit");
        assert_eq!(
            require_env("DB_POOL_TEST_REQUIRED").unwrap(),
            "postgres://localhost/audit"
        );
        std::env::remove_var("DB_POOL_TEST_REQUIRED");
    }
}
