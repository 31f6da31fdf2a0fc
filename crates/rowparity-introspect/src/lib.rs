//! Database adapters used by the reconciliation engine.

use std::sync::Arc;

use rowparity_core::{Engine, InstanceDescriptor};

pub mod adapter;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mysql;
pub mod options;

pub use adapter::{Connector, Session};
#[cfg(any(test, feature = "testing"))]
pub use memory::{FailPoint, MemoryConnector, MemoryInstance, MemoryStatement};
pub use mysql::{MySqlConnector, MySqlSession};
pub use options::ConnectOptions;

/// Pick the adapter able to reach `descriptor`.
pub fn connector_for(descriptor: &InstanceDescriptor, options: ConnectOptions) -> Arc<dyn Connector> {
    match descriptor.engine {
        Engine::Mysql | Engine::Tidb => Arc::new(MySqlConnector::new(descriptor.clone(), options)),
    }
}
