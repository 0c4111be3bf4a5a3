use anyhow::{ensure, Context};
use collaboration::{CollaborationConfig, MAX_TOPIC_CAPACITY};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server settings, overridable through `COLLAB_*` environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Pooled connections to the on-disk database
    pub database_pool_size: u32,
    pub collaboration: CollaborationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_path: project::app_data_dir().join("projects.db"),
            database_pool_size: project::DEFAULT_POOL_SIZE,
            collaboration: CollaborationConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("COLLAB_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("invalid COLLAB_BIND_ADDR '{}'", addr))?;
        }
        if let Some(path) = lookup("COLLAB_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("COLLAB_DATABASE_POOL_SIZE") {
            let size: u32 = size
                .parse()
                .with_context(|| format!("invalid COLLAB_DATABASE_POOL_SIZE '{}'", size))?;
            ensure!(size > 0, "COLLAB_DATABASE_POOL_SIZE must be at least 1");
            config.database_pool_size = size;
        }
        if let Some(capacity) = lookup("COLLAB_BROADCAST_CAPACITY") {
            let capacity: usize = capacity
                .parse()
                .with_context(|| format!("invalid COLLAB_BROADCAST_CAPACITY '{}'", capacity))?;
            ensure!(
                (1..=MAX_TOPIC_CAPACITY).contains(&capacity),
                "COLLAB_BROADCAST_CAPACITY must be between 1 and {}, got {}",
                MAX_TOPIC_CAPACITY,
                capacity
            );
            config.collaboration.broadcast_capacity = capacity;
        }

        Ok(config)
    }
}
