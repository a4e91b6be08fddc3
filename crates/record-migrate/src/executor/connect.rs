//! Connection handle management: authentication, caching, login checks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::InstanceConfig;
use crate::core::traits::{Connection, ConnectionProvider};
use crate::error::Result;

/// Obtains and caches authenticated handles from a [`ConnectionProvider`].
///
/// Handles are cached per instance/session key, so repeated
/// [`get_connection`](ConnectionManager::get_connection) calls for the same
/// descriptor reuse one login.
pub struct ConnectionManager {
    provider: Arc<dyn ConnectionProvider>,
    cache: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl ConnectionManager {
    /// Manager over a provider.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Authenticated handle for an instance, cached after the first login.
    ///
    /// Fails with a connection error on unreachable host or rejected
    /// credentials.
    pub async fn get_connection(&self, instance: &InstanceConfig) -> Result<Arc<dyn Connection>> {
        let key = instance.cache_key();
        if let Some(handle) = self.cache.lock().unwrap().get(&key) {
            return Ok(handle.clone());
        }

        let handle = self.provider.authenticate(instance).await?;
        self.cache.lock().unwrap().insert(key, handle.clone());
        Ok(handle)
    }

    /// Verify credentials against one instance without migrating anything.
    ///
    /// Never errors: a failed login is reported as a warning and `false`.
    pub async fn test_login(&self, instance: &InstanceConfig) -> bool {
        info!(
            "Testing login against [{}:{}]-[{}]",
            instance.host, instance.port, instance.database
        );
        match self.provider.authenticate(instance).await {
            Ok(_) => {
                info!("Login OK");
                true
            }
            Err(e) => {
                warn!("Login FAILED: {}", e);
                false
            }
        }
    }
}
