use std::time::Duration;

use rowparity_core::{DEFAULT_CONNECT_TIMEOUT, ReconcileConfig};

/// Options that control how sessions are established.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound on establishing one session.
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}
