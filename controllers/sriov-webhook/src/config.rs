//! Webhook configuration from environment variables.

use crate::error::ControllerError;
use ip_manager::{LockScope, ManagerOptions, OwnerLookupPolicy};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration, read once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the admission endpoints listen on
    pub listen_addr: SocketAddr,
    pub lock_scope: LockScope,
    pub lock_timeout: Duration,
    pub owner_policy: OwnerLookupPolicy,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when it is unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("LISTEN_ADDR: {}", e)))?;

        let lock_scope = match lookup("ALLOCATION_LOCK_SCOPE") {
            Some(value) => value
                .parse::<LockScope>()
                .map_err(|e| ControllerError::InvalidConfig(format!("ALLOCATION_LOCK_SCOPE: {}", e)))?,
            None => LockScope::default(),
        };

        let lock_timeout_secs = match lookup("ALLOCATION_LOCK_TIMEOUT_SECS") {
            Some(value) => value.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("ALLOCATION_LOCK_TIMEOUT_SECS: {}", e))
            })?,
            None => DEFAULT_LOCK_TIMEOUT_SECS,
        };
        if lock_timeout_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "ALLOCATION_LOCK_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let owner_policy = match lookup("OWNER_LOOKUP_FAILURE") {
            Some(value) => value
                .parse::<OwnerLookupPolicy>()
                .map_err(|e| ControllerError::InvalidConfig(format!("OWNER_LOOKUP_FAILURE: {}", e)))?,
            None => OwnerLookupPolicy::default(),
        };

        Ok(Self {
            listen_addr,
            lock_scope,
            lock_timeout: Duration::from_secs(lock_timeout_secs),
            owner_policy,
        })
    }

    /// Allocation engine options derived from this configuration.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            lock_scope: self.lock_scope,
            lock_timeout: self.lock_timeout,
            owner_policy: self.owner_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.lock_scope, LockScope::Network);
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert_eq!(config.owner_policy, OwnerLookupPolicy::Fail);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("LISTEN_ADDR", "127.0.0.1:9443"),
            ("ALLOCATION_LOCK_SCOPE", "global"),
            ("ALLOCATION_LOCK_TIMEOUT_SECS", "3"),
            ("OWNER_LOOKUP_FAILURE", "skip"),
        ])
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9443);
        let options = config.manager_options();
        assert_eq!(options.lock_scope, LockScope::Global);
        assert_eq!(options.lock_timeout, Duration::from_secs(3));
        assert_eq!(options.owner_policy, OwnerLookupPolicy::Skip);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            [("LISTEN_ADDR", "not-an-address")],
            [("ALLOCATION_LOCK_SCOPE", "pod")],
            [("ALLOCATION_LOCK_TIMEOUT_SECS", "ten")],
            [("ALLOCATION_LOCK_TIMEOUT_SECS", "0")],
            [("OWNER_LOOKUP_FAILURE", "ignore")],
        ] {
            assert!(
                matches!(config(&vars), Err(ControllerError::InvalidConfig(_))),
                "{:?} should be rejected",
                vars
            );
        }
    }
}
