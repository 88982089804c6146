//! Application state management

use crate::auth::password::PasswordConfig;
use agenda_core::{AgendaStore, AppConfig, MemoryStore};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Persistence backend
    pub store: Arc<dyn AgendaStore>,
    /// Argon2 parameters derived from `config.auth`
    pub password: PasswordConfig,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn AgendaStore>) -> Self {
        let password = PasswordConfig::from(&config.auth);
        Self {
            config,
            store,
            password,
            start_time: Instant::now(),
        }
    }

    /// State backed by a fresh in-memory store
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::in_memory(AppConfig::default())
    }
}
