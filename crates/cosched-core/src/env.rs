//! Environment variable utilities
//!
//! Every runtime knob can be overridden with a `COS_*` variable; these
//! helpers parse them with a fallback.
//!
//! ```ignore
//! use cosched_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let max: usize = env_get("COS_MAX_COROUTINES", 1024);
//! let debug = env_get_bool("COS_DEBUG", false);
//! let read_timeout = env_get_ms("COS_READ_TIMEOUT_MS", 10_000);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean flag. "1", "true", "yes", "on" (any case) are true; any
/// other set value is false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Millisecond count as a `Duration`.
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__COS_TEST_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__COS_TEST_UNSET_VAR__", true));
        assert_eq!(env_get_ms("__COS_TEST_UNSET_VAR__", 250), Duration::from_millis(250));
    }

    #[test]
    fn test_env_get_set_and_invalid() {
        std::env::set_var("__COS_TEST_NUM__", " 123 ");
        let val: usize = env_get("__COS_TEST_NUM__", 0);
        assert_eq!(val, 123);

        std::env::set_var("__COS_TEST_NUM__", "lots");
        let val: usize = env_get("__COS_TEST_NUM__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__COS_TEST_NUM__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        for yes in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var("__COS_TEST_BOOL__", yes);
            assert!(env_get_bool("__COS_TEST_BOOL__", false), "{}", yes);
        }
        for no in ["0", "false", "garbage"] {
            std::env::set_var("__COS_TEST_BOOL__", no);
            assert!(!env_get_bool("__COS_TEST_BOOL__", true), "{}", no);
        }
        std::env::remove_var("__COS_TEST_BOOL__");
    }
}
