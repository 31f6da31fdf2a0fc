use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use rowparity_core::{Result, SnapshotToken, table_set};
use rowparity_introspect::{Connector, Session};

use crate::sessions::{close_session, open_session};

/// Enumerates schemas and tables of one instance.
#[derive(Clone)]
pub struct SchemaCatalog {
    connector: Arc<dyn Connector>,
    snapshot: Option<SnapshotToken>,
}

impl SchemaCatalog {
    pub fn new(connector: Arc<dyn Connector>, snapshot: Option<SnapshotToken>) -> Self {
        Self {
            connector,
            snapshot,
        }
    }

    /// Schema names matching a LIKE pattern, ordered by name.
    pub async fn list_schemas(&self, pattern: &str) -> Result<Vec<String>> {
        self.resolve(&[pattern.to_string()]).await
    }

    /// Base tables of `schema`, ordered by name.
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut session = open_session("catalog", self.connector.as_ref(), self.snapshot).await?;
        let tables = session.list_tables(schema).await;
        close_session("catalog", session).await;
        tables
    }

    /// Resolve every non-blank pattern in one session.
    ///
    /// Results keep the order in which schemas are first seen, without duplicates.
    pub async fn resolve(&self, patterns: &[String]) -> Result<Vec<String>> {
        let mut session = open_session("catalog", self.connector.as_ref(), self.snapshot).await?;
        let resolved = resolve_on(session.as_mut(), patterns).await;
        close_session("catalog", session).await;
        let schemas = resolved?;

        tracing::info!(
            event = "schemas_resolved",
            instance = %self.connector.describe(),
            patterns = ?patterns,
            count = schemas.len()
        );
        Ok(schemas)
    }
}

async fn resolve_on(session: &mut dyn Session, patterns: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut schemas = Vec::new();
    for pattern in patterns.iter().map(|pattern| pattern.trim()) {
        if pattern.is_empty() {
            continue;
        }
        for schema in session.list_schemas(pattern).await? {
            if seen.insert(schema.clone()) {
                schemas.push(schema);
            }
        }
    }
    Ok(schemas)
}

/// Table set of `schema` on an open session, with ignored names removed.
pub async fn tables_on(
    session: &mut dyn Session,
    schema: &str,
    ignore: &BTreeSet<String>,
) -> Result<Vec<String>> {
    let tables = session.list_tables(schema).await?;
    Ok(table_set(tables, ignore))
}

#[cfg(test)]
mod tests {
    use rowparity_core::Error;
    use rowparity_introspect::{FailPoint, MemoryConnector, MemoryInstance, MemoryStatement};

    use super::*;

    fn instance() -> MemoryInstance {
        MemoryInstance::new()
            .with_table("app_1", "orders", 1)
            .with_table("app_2", "orders", 1)
            .with_schema("billing")
            .with_schema("mysql")
    }

    #[tokio::test]
    async fn resolves_patterns_in_first_seen_order() {
        let connector = MemoryConnector::new(instance());
        let catalog = SchemaCatalog::new(Arc::new(connector.clone()), None);

        let schemas = catalog
            .resolve(&["bill%".to_string(), " ".to_string(), "%".to_string()])
            .await
            .expect("resolve");
        assert_eq!(schemas, vec!["billing", "app_1", "app_2", "mysql"]);
        assert_eq!(connector.sessions_opened(), 1);
        assert_eq!(connector.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn pins_snapshot_before_listing() {
        let connector = MemoryConnector::new(instance());
        let token = SnapshotToken::parse("77").expect("token");
        let catalog = SchemaCatalog::new(Arc::new(connector.clone()), Some(token));

        catalog.list_schemas("app%").await.expect("list");
        assert_eq!(
            connector.statements(),
            vec![
                MemoryStatement::PinSnapshot(77),
                MemoryStatement::ListSchemas("app%".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let connector = MemoryConnector::new(instance()).fail_on(FailPoint::ListSchemas);
        let catalog = SchemaCatalog::new(Arc::new(connector.clone()), None);

        let err = catalog.list_schemas("%").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(connector.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn tables_on_filters_ignored_names() {
        let connector = MemoryConnector::new(
            MemoryInstance::new()
                .with_table("db", "orders", 1)
                .with_table("db", "audit_log", 1),
        );
        let mut session = connector.connect().await.expect("connect");
        let ignore: BTreeSet<String> = ["audit_log".to_string()].into_iter().collect();

        let tables = tables_on(session.as_mut(), "db", &ignore)
            .await
            .expect("tables");
        assert_eq!(tables, vec!["orders"]);

        let catalog = SchemaCatalog::new(Arc::new(connector.clone()), None);
        assert_eq!(
            catalog.list_tables("db").await.expect("tables"),
            vec!["audit_log", "orders"]
        );
    }
}
