//! Runtime configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's config file named by `COS_CONFIG_RS` (compile-time)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use cosched_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .max_coroutines(4096)
//!     .read_timeout(Duration::from_secs(2));
//! ```

pub mod defaults;

use std::time::Duration;

use cosched_core::constants::{MAX_STACK_SIZE, RESERVED_FDS};
use cosched_core::env::{env_get, env_get_bool, env_get_ms};
use cosched_core::{SchedError, SchedResult};

use crate::memory::page_size;

/// Runtime configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of live coroutines
    pub max_coroutines: usize,
    /// Usable stack bytes per coroutine (a guard page is added on top)
    pub stack_size: usize,
    /// Timer node pool capacity; 0 means one per coroutine
    pub timer_nodes: usize,
    /// Event table size; 0 means `max_coroutines` plus reserved descriptors
    pub max_fds: usize,
    /// Wait bound when no timer is pending
    pub idle_wait: Duration,
    /// Bound on a non-blocking connect
    pub connect_timeout: Duration,
    /// Bound on each accept wait
    pub accept_timeout: Duration,
    /// Bound on each read/recv wait
    pub read_timeout: Duration,
    /// Bound on each write/send wait
    pub write_timeout: Duration,
    /// TCP keepalive idle time applied to accepted sockets
    pub keepalive_secs: u32,
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `COS_MAX_COROUTINES` - Max live coroutines
    /// - `COS_STACK_SIZE` - Stack bytes per coroutine
    /// - `COS_TIMER_NODES` - Timer node pool capacity
    /// - `COS_MAX_FDS` - Event table size
    /// - `COS_IDLE_WAIT_MS` - Idle wait bound
    /// - `COS_CONNECT_TIMEOUT_MS`, `COS_ACCEPT_TIMEOUT_MS`,
    ///   `COS_READ_TIMEOUT_MS`, `COS_WRITE_TIMEOUT_MS` - I/O bounds
    /// - `COS_KEEPALIVE_SECS` - Keepalive idle seconds
    /// - `COS_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            max_coroutines: env_get("COS_MAX_COROUTINES", defaults::MAX_COROUTINES),
            stack_size: env_get("COS_STACK_SIZE", defaults::STACK_SIZE),
            timer_nodes: env_get("COS_TIMER_NODES", defaults::TIMER_NODES),
            max_fds: env_get("COS_MAX_FDS", defaults::MAX_FDS),
            idle_wait: env_get_ms("COS_IDLE_WAIT_MS", defaults::IDLE_WAIT_MS),
            connect_timeout: env_get_ms("COS_CONNECT_TIMEOUT_MS", defaults::CONNECT_TIMEOUT_MS),
            accept_timeout: env_get_ms("COS_ACCEPT_TIMEOUT_MS", defaults::ACCEPT_TIMEOUT_MS),
            read_timeout: env_get_ms("COS_READ_TIMEOUT_MS", defaults::READ_TIMEOUT_MS),
            write_timeout: env_get_ms("COS_WRITE_TIMEOUT_MS", defaults::WRITE_TIMEOUT_MS),
            keepalive_secs: env_get("COS_KEEPALIVE_SECS", defaults::KEEPALIVE_SECS),
            debug_logging: env_get_bool("COS_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Create config with compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            max_coroutines: defaults::MAX_COROUTINES,
            stack_size: defaults::STACK_SIZE,
            timer_nodes: defaults::TIMER_NODES,
            max_fds: defaults::MAX_FDS,
            idle_wait: Duration::from_millis(defaults::IDLE_WAIT_MS),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            accept_timeout: Duration::from_millis(defaults::ACCEPT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(defaults::READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(defaults::WRITE_TIMEOUT_MS),
            keepalive_secs: defaults::KEEPALIVE_SECS,
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn max_coroutines(mut self, n: usize) -> Self {
        self.max_coroutines = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn timer_nodes(mut self, n: usize) -> Self {
        self.timer_nodes = n;
        self
    }

    pub fn max_fds(mut self, n: usize) -> Self {
        self.max_fds = n;
        self
    }

    pub fn idle_wait(mut self, d: Duration) -> Self {
        self.idle_wait = d;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn accept_timeout(mut self, d: Duration) -> Self {
        self.accept_timeout = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = d;
        self
    }

    pub fn keepalive_secs(mut self, secs: u32) -> Self {
        self.keepalive_secs = secs;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Timer pool capacity after resolving the `0 = auto` default.
    pub fn effective_timer_nodes(&self) -> usize {
        if self.timer_nodes == 0 {
            self.max_coroutines
        } else {
            self.timer_nodes
        }
    }

    /// Event table size after resolving the `0 = auto` default.
    pub fn effective_max_fds(&self) -> usize {
        if self.max_fds == 0 {
            self.max_coroutines.saturating_add(RESERVED_FDS)
        } else {
            self.max_fds
        }
    }

    /// Stack size rounded up to a whole number of pages.
    pub fn aligned_stack_size(&self) -> usize {
        let page = page_size();
        self.stack_size.div_ceil(page).saturating_mul(page)
    }

    /// Validate configuration.
    pub fn validate(&self) -> SchedResult<()> {
        if self.max_coroutines < 2 {
            return Err(SchedError::InvalidConfig("max_coroutines must be >= 2"));
        }
        if self.stack_size < page_size() {
            return Err(SchedError::InvalidConfig("stack_size must be at least one page"));
        }
        if self.stack_size > MAX_STACK_SIZE {
            return Err(SchedError::InvalidConfig("stack_size must be <= 10 MiB"));
        }
        if self.effective_timer_nodes() < 2 {
            return Err(SchedError::InvalidConfig("timer_nodes must be >= 2"));
        }
        if self.effective_max_fds() > i32::MAX as usize {
            return Err(SchedError::InvalidConfig("max_fds does not fit a descriptor"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("cosched configuration:");
        eprintln!("  max_coroutines:   {}", self.max_coroutines);
        eprintln!("  stack_size:       {}", self.aligned_stack_size());
        eprintln!("  timer_nodes:      {}", self.effective_timer_nodes());
        eprintln!("  max_fds:          {}", self.effective_max_fds());
        eprintln!("  idle_wait:        {:?}", self.idle_wait);
        eprintln!("  connect_timeout:  {:?}", self.connect_timeout);
        eprintln!("  accept_timeout:   {:?}", self.accept_timeout);
        eprintln!("  read_timeout:     {:?}", self.read_timeout);
        eprintln!("  write_timeout:    {:?}", self.write_timeout);
        eprintln!("  keepalive_secs:   {}", self.keepalive_secs);
        eprintln!("  debug_logging:    {}", self.debug_logging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RuntimeConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_timer_nodes(), config.max_coroutines);
        assert_eq!(config.effective_max_fds(), config.max_coroutines + RESERVED_FDS);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .max_coroutines(8)
            .timer_nodes(3)
            .read_timeout(Duration::from_millis(50));

        assert_eq!(config.max_coroutines, 8);
        assert_eq!(config.effective_timer_nodes(), 3);
        assert_eq!(config.read_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_validation() {
        assert!(RuntimeConfig::new().max_coroutines(1).validate().is_err());
        assert!(RuntimeConfig::new().stack_size(16).validate().is_err());
        assert!(RuntimeConfig::new().stack_size(MAX_STACK_SIZE + 1).validate().is_err());
        assert!(RuntimeConfig::new().timer_nodes(1).validate().is_err());
        assert!(RuntimeConfig::new().stack_size(MAX_STACK_SIZE).validate().is_ok());
    }

    #[test]
    fn test_stack_rounded_to_page() {
        let page = page_size();
        let config = RuntimeConfig::new().stack_size(page + 1);
        assert_eq!(config.aligned_stack_size(), 2 * page);
    }
}
