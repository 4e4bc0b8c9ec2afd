//! Server configuration.

use replidb_core::DatabaseConfig;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Configuration of the server's own replica.
    pub db: DatabaseConfig,
    /// Maximum live subscriptions per connection.
    pub max_queries_per_connection: usize,
}

impl ServerConfig {
    /// In-memory server configuration with defaults.
    pub fn memory(client_id: impl Into<String>) -> Self {
        Self {
            db: DatabaseConfig::memory(client_id),
            max_queries_per_connection: 256,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::memory("server")
    }
}
