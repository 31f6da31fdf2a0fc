use std::collections::BTreeMap;

use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::Row;

use rowparity_core::{Error, ObjectKind, Result};

pub(crate) const PIN_SNAPSHOT_SQL: &str = "SET @@tidb_snapshot = ?";

const LIST_SCHEMAS_SQL: &str = r#"
    SELECT CAST(SCHEMA_NAME AS CHAR) AS schema_name
    FROM INFORMATION_SCHEMA.SCHEMATA
    WHERE SCHEMA_NAME LIKE ?
    ORDER BY SCHEMA_NAME
"#;

const LIST_TABLES_SQL: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR) AS table_name
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const TABLE_COUNT_SQL: &str = r#"
    SELECT CAST(t.TABLE_SCHEMA AS CHAR) AS schema_name, CAST(COUNT(*) AS SIGNED) AS total
    FROM INFORMATION_SCHEMA.TABLES t
    WHERE t.TABLE_TYPE = 'BASE TABLE'
    GROUP BY t.TABLE_SCHEMA
"#;

const VIEW_COUNT_SQL: &str = r#"
    SELECT CAST(t.TABLE_SCHEMA AS CHAR) AS schema_name, CAST(COUNT(*) AS SIGNED) AS total
    FROM INFORMATION_SCHEMA.TABLES t
    WHERE t.TABLE_TYPE = 'VIEW'
    GROUP BY t.TABLE_SCHEMA
"#;

// Only TiDB exposes this table; plain MySQL rejects the query.
const INDEX_COUNT_SQL: &str = r#"
    SELECT CAST(TABLE_SCHEMA AS CHAR) AS schema_name, CAST(COUNT(*) AS SIGNED) AS total
    FROM INFORMATION_SCHEMA.TIDB_INDEXES
    GROUP BY TABLE_SCHEMA
"#;

/// Back-quote an identifier, doubling embedded back-quotes.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// One `UNION ALL` statement counting every table of a batch.
///
/// Each branch yields `(cnt, table_name)` so results can be matched back to
/// their table regardless of row order. Labels are bound, one `?` per table,
/// in table order.
pub fn batch_count_sql(schema: &str, tables: &[String]) -> String {
    let schema = quote_ident(schema);
    tables
        .iter()
        .map(|table| {
            format!(
                "SELECT COUNT(1) AS cnt, CAST(? AS CHAR) AS table_name FROM {schema}.{}",
                quote_ident(table)
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

/// Statistics lookup for `table_count` tables, all passed as bound parameters.
pub fn statistics_sql(table_count: usize) -> String {
    let placeholders = vec!["?"; table_count].join(", ");
    format!(
        "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, \
         CAST(COALESCE(TABLE_ROWS, 0) AS SIGNED) AS cnt \
         FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' AND TABLE_NAME IN ({placeholders})"
    )
}

pub fn object_count_sql(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Tables => TABLE_COUNT_SQL,
        ObjectKind::Indexes => INDEX_COUNT_SQL,
        ObjectKind::Views => VIEW_COUNT_SQL,
    }
}

fn query_error(context: &str, err: sqlx::Error) -> Error {
    Error::Query(format!("{context}: {err}"))
}

pub async fn pin_snapshot(conn: &mut MySqlConnection, token: i64) -> Result<()> {
    sqlx::query(PIN_SNAPSHOT_SQL)
        .bind(token)
        .execute(&mut *conn)
        .await
        .map_err(|err| query_error("setting snapshot", err))?;
    Ok(())
}

pub async fn list_schemas(conn: &mut MySqlConnection, pattern: &str) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(LIST_SCHEMAS_SQL)
        .bind(pattern)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| Error::Connection(format!("listing schemas like '{pattern}': {err}")))
}

pub async fn list_tables(conn: &mut MySqlConnection, schema: &str) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(LIST_TABLES_SQL)
        .bind(schema)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| query_error(&format!("listing tables of {schema}"), err))
}

pub async fn execute_raw(conn: &mut MySqlConnection, statement: &'static str) -> Result<()> {
    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement))
        .await
        .map_err(|err| query_error(statement, err))?;
    Ok(())
}

pub async fn count_rows(
    conn: &mut MySqlConnection,
    schema: &str,
    tables: &[String],
) -> Result<Vec<(String, i64)>> {
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    let sql = batch_count_sql(schema, tables);
    let mut query = sqlx::query(&sql).persistent(false);
    for table in tables {
        query = query.bind(table);
    }
    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| query_error(&format!("counting rows in {schema}"), err))?;
    rows.iter().map(map_count_row).collect()
}

pub async fn estimate_rows(
    conn: &mut MySqlConnection,
    schema: &str,
    tables: &[String],
) -> Result<Vec<(String, i64)>> {
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    let sql = statistics_sql(tables.len());
    let mut query = sqlx::query(&sql).persistent(false).bind(schema);
    for table in tables {
        query = query.bind(table);
    }
    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| query_error(&format!("reading table statistics of {schema}"), err))?;
    rows.iter().map(map_count_row).collect()
}

pub async fn count_objects(
    conn: &mut MySqlConnection,
    kind: ObjectKind,
) -> Result<BTreeMap<String, u64>> {
    let rows = sqlx::query(object_count_sql(kind))
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| query_error(&format!("counting {kind}"), err))?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let schema: String = row
            .try_get("schema_name")
            .map_err(|err| query_error("decoding schema name", err))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|err| query_error("decoding object count", err))?;
        counts.insert(schema, u64::try_from(total).unwrap_or(0));
    }
    Ok(counts)
}

fn map_count_row(row: &MySqlRow) -> Result<(String, i64)> {
    let table: String = row
        .try_get("table_name")
        .map_err(|err| query_error("decoding table name", err))?;
    let count: i64 = row
        .try_get("cnt")
        .map_err(|err| query_error("decoding row count", err))?;
    Ok((table, count))
}
