//! Final statements that move intermediate tables into the destination.

use tracing::{debug, info, warn};

use super::types::{MergeSpec, SchemaDescriptor, TableIdentifier};
use crate::error::WarehouseError;
use crate::sql::{build_aggregate_insert, build_delete_all, build_merge};
use crate::warehouse::WarehouseConnection;

/// Merge every `from_tables` entry into `to_table`.
///
/// MERGE reads from a single source, so the first intermediate table absorbs the others
/// with one `INSERT ... UNION ALL` before the MERGE runs against it.
pub async fn collect_merge(
    connection: &dyn WarehouseConnection,
    from_tables: &[TableIdentifier],
    schema: &SchemaDescriptor,
    to_table: &TableIdentifier,
    merge: &MergeSpec,
    pre_sql: Option<&str>,
    post_sql: Option<&str>,
) -> Result<(), WarehouseError> {
    let Some((aggregate_to, rest)) = from_tables.split_first() else {
        return Ok(());
    };

    let mut statements = Vec::new();
    if let Some(sql) = build_aggregate_insert(rest, aggregate_to) {
        statements.push(sql);
    }
    statements.push(build_merge(aggregate_to, schema, to_table, merge));

    run_in_transaction(connection, pre_sql, &statements, post_sql).await
}

/// Copy every `from_tables` entry into `to_table` with one `INSERT ... UNION ALL`,
/// optionally emptying `to_table` first.
pub async fn collect_insert(
    connection: &dyn WarehouseConnection,
    from_tables: &[TableIdentifier],
    to_table: &TableIdentifier,
    truncate: bool,
    pre_sql: Option<&str>,
    post_sql: Option<&str>,
) -> Result<(), WarehouseError> {
    let mut statements = Vec::new();
    if truncate {
        statements.push(build_delete_all(to_table));
    }
    if let Some(sql) = build_aggregate_insert(from_tables, to_table) {
        statements.push(sql);
    }
    if statements.is_empty() {
        return Ok(());
    }

    run_in_transaction(connection, pre_sql, &statements, post_sql).await
}

/// Run `pre`, the updates and `post`, then commit. Any failure rolls back and the
/// original error is returned.
pub async fn run_in_transaction(
    connection: &dyn WarehouseConnection,
    pre_sql: Option<&str>,
    statements: &[String],
    post_sql: Option<&str>,
) -> Result<(), WarehouseError> {
    let result = async {
        if let Some(sql) = pre_sql {
            debug!("{}", sql);
            connection.execute(sql).await?;
        }
        for sql in statements {
            debug!("{}", sql);
            let rows = connection.execute_update(sql).await?;
            info!("{} rows affected", rows);
        }
        if let Some(sql) = post_sql {
            debug!("{}", sql);
            connection.execute(sql).await?;
        }
        connection.commit().await
    }
    .await;

    if let Err(e) = result {
        if let Err(rollback) = connection.rollback().await {
            warn!("Rollback failed: {}", rollback);
        }
        return Err(e);
    }
    Ok(())
}
