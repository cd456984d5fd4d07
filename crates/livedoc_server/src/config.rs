//! Server configuration.

use std::net::SocketAddr;

/// Configuration for the live query server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP transport binds to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum open live queries per connection.
    pub max_live_queries_per_connection: usize,
    /// Cap on documents returned by a list query. Also applied when the
    /// query sets no limit. Off by default.
    pub max_limit: Option<u64>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            max_live_queries_per_connection: 64,
            max_limit: None,
        }
    }

    /// Sets the maximum concurrent connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum open live queries per connection.
    #[must_use]
    pub fn with_max_live_queries(mut self, max: usize) -> Self {
        self.max_live_queries_per_connection = max;
        self
    }

    /// Sets the list size cap. `None` removes it.
    #[must_use]
    pub fn with_max_limit(mut self, max: Option<u64>) -> Self {
        self.max_limit = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
