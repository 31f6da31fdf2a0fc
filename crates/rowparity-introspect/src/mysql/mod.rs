use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;

use rowparity_core::{Error, InstanceDescriptor, ObjectKind, Result, SnapshotToken};

use crate::adapter::{Connector, Session};
use crate::options::ConnectOptions;

pub mod queries;

/// Adapter for MySQL and TiDB instances.
///
/// Sessions are single connections, never pooled: each job owns its own pair.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    descriptor: InstanceDescriptor,
    options: ConnectOptions,
}

impl MySqlConnector {
    pub fn new(descriptor: InstanceDescriptor, options: ConnectOptions) -> Self {
        Self {
            descriptor,
            options,
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.descriptor.host)
            .port(self.descriptor.port)
            .username(&self.descriptor.user);
        match &self.descriptor.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn engine(&self) -> &'static str {
        self.descriptor.engine.as_str()
    }

    fn describe(&self) -> String {
        self.descriptor.to_string()
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let options = self.connect_options();
        let timeout = self.options.connect_timeout;
        let conn = tokio::time::timeout(timeout, MySqlConnection::connect_with(&options))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "timed out after {}s connecting to {}",
                    timeout.as_secs(),
                    self.descriptor
                ))
            })?
            .map_err(|err| Error::Connection(format!("{}: {err}", self.descriptor)))?;

        tracing::debug!(event = "session_opened", instance = %self.descriptor);
        Ok(Box::new(MySqlSession {
            conn: Some(conn),
            address: self.descriptor.to_string(),
        }))
    }
}

/// One MySQL connection owned by a single job.
pub struct MySqlSession {
    conn: Option<MySqlConnection>,
    address: String,
}

impl MySqlSession {
    fn conn(&mut self) -> Result<&mut MySqlConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("session to {} is closed", self.address)))
    }
}

#[async_trait]
impl Session for MySqlSession {
    async fn pin_snapshot(&mut self, token: SnapshotToken) -> Result<()> {
        queries::pin_snapshot(self.conn()?, token.value()).await
    }

    async fn list_schemas(&mut self, pattern: &str) -> Result<Vec<String>> {
        queries::list_schemas(self.conn()?, pattern).await
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        queries::list_tables(self.conn()?, schema).await
    }

    async fn begin(&mut self) -> Result<()> {
        queries::execute_raw(self.conn()?, "START TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        queries::execute_raw(self.conn()?, "COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        queries::execute_raw(self.conn()?, "ROLLBACK").await
    }

    async fn count_rows(&mut self, schema: &str, tables: &[String]) -> Result<Vec<(String, i64)>> {
        queries::count_rows(self.conn()?, schema, tables).await
    }

    async fn estimate_rows(
        &mut self,
        schema: &str,
        tables: &[String],
    ) -> Result<Vec<(String, i64)>> {
        queries::estimate_rows(self.conn()?, schema, tables).await
    }

    async fn count_objects(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, u64>> {
        queries::count_objects(self.conn()?, kind).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|err| Error::Connection(format!("closing {}: {err}", self.address)))?;
        }
        Ok(())
    }
}
