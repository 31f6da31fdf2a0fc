use std::env;

use anyhow::{Context, Result};
use rowparity_core::{InstanceDescriptor, ObjectKind};
use rowparity_introspect::{ConnectOptions, connector_for};

const SCHEMA: &str = "rowparity_it";

const FIXTURE: &[&str] = &[
    "DROP DATABASE IF EXISTS rowparity_it",
    "CREATE DATABASE rowparity_it",
    "CREATE TABLE rowparity_it.orders (id INT PRIMARY KEY)",
    "CREATE TABLE rowparity_it.`we``ird` (id INT PRIMARY KEY)",
    "CREATE VIEW rowparity_it.order_ids AS SELECT id FROM rowparity_it.orders",
    "INSERT INTO rowparity_it.orders VALUES (1), (2), (3)",
    "INSERT INTO rowparity_it.`we``ird` VALUES (1)",
    r"CREATE TABLE rowparity_it.`back\slash` (id INT PRIMARY KEY)",
    r"INSERT INTO rowparity_it.`back\slash` VALUES (1), (2)",
];

fn database_url() -> Option<String> {
    env::var("TEST_MYSQL_URL").ok().filter(|url| !url.trim().is_empty())
}

#[tokio::test]
async fn counts_rows_and_objects_on_mysql() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("TEST_MYSQL_URL not set, skipping MySQL integration test");
        return Ok(());
    };

    run_fixture(&url).await?;

    let descriptor = InstanceDescriptor::parse(&url).context("parsing TEST_MYSQL_URL")?;
    let connector = connector_for(&descriptor, ConnectOptions::default());
    let mut session = connector.connect().await.context("connecting to MySQL")?;

    let schemas = session.list_schemas("rowparity\\_it").await?;
    assert_eq!(schemas, vec![SCHEMA.to_string()]);

    let tables = session.list_tables(SCHEMA).await?;
    assert_eq!(
        tables,
        vec![
            r"back\slash".to_string(),
            "orders".to_string(),
            "we`ird".to_string()
        ]
    );

    session.begin().await?;
    let counts = session.count_rows(SCHEMA, &tables).await?;
    session.commit().await?;
    assert!(counts.contains(&("orders".to_string(), 3)));
    assert!(counts.contains(&("we`ird".to_string(), 1)));
    assert!(counts.contains(&(r"back\slash".to_string(), 2)));

    let views = session.count_objects(ObjectKind::Views).await?;
    assert_eq!(views.get(SCHEMA), Some(&1));

    session.close().await?;
    Ok(())
}

async fn run_fixture(url: &str) -> Result<()> {
    use sqlx::Connection;

    let mut conn = sqlx::MySqlConnection::connect(url)
        .await
        .context("connecting for fixtures")?;
    for statement in FIXTURE {
        sqlx::raw_sql(statement)
            .execute(&mut conn)
            .await
            .with_context(|| format!("executing fixture {statement}"))?;
    }
    conn.close().await?;
    Ok(())
}
