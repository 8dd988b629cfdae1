//! SQL sessions over the Statement Execution API.
//!
//! Each statement is submitted with the session's catalog and schema and polled until it
//! reaches a terminal state. The API runs every statement in autocommit mode, so
//! `commit` and `rollback` have nothing to do.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::ApiClient;
use crate::error::WarehouseError;
use crate::warehouse::{
    ColumnRow, PrimaryKeyRow, TableRow, WarehouseConnection, WarehouseConnector,
};

const STATEMENTS_API: &str = "api/2.0/sql/statements";
const WAIT_TIMEOUT: &str = "30s";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Warehouse id is the last segment of an HTTP path like `/sql/1.0/warehouses/abc123`.
pub fn warehouse_id_from_http_path(http_path: &str) -> Option<&str> {
    http_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, Serialize)]
struct StatementParameter {
    name: String,
    value: String,
    #[serde(rename = "type")]
    type_name: &'static str,
}

impl StatementParameter {
    fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            type_name: "STRING",
        }
    }
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    catalog: &'a str,
    schema: &'a str,
    wait_timeout: &'a str,
    on_wait_timeout: &'a str,
    format: &'a str,
    disposition: &'a str,
    parameters: &'a [StatementParameter],
}

#[derive(Debug, Deserialize)]
struct StatementError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<StatementError>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    #[serde(default)]
    next_chunk_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    #[serde(default)]
    result: Option<ResultData>,
}

/// Opens sessions bound to one SQL warehouse, catalog and schema.
#[derive(Debug, Clone)]
pub struct StatementConnector {
    api: ApiClient,
    warehouse_id: String,
    catalog: String,
    schema: String,
}

impl StatementConnector {
    pub fn new(api: ApiClient, warehouse_id: &str, catalog: &str, schema: &str) -> Self {
        Self {
            api,
            warehouse_id: warehouse_id.to_string(),
            catalog: catalog.to_string(),
            schema: schema.to_string(),
        }
    }
}

#[async_trait]
impl WarehouseConnector for StatementConnector {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        Ok(Box::new(StatementConnection {
            api: self.api.clone(),
            warehouse_id: self.warehouse_id.clone(),
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct StatementConnection {
    api: ApiClient,
    warehouse_id: String,
    catalog: String,
    schema: String,
}

impl StatementConnection {
    /// Run `sql` to completion and return every result row.
    async fn query(
        &self,
        sql: &str,
        parameters: &[StatementParameter],
    ) -> Result<Vec<Vec<Option<String>>>, WarehouseError> {
        trace!("{}", sql);
        let url = self.api.endpoint(STATEMENTS_API, [] as [&str; 0])?;
        let request = self.api.request(Method::POST, url).await?.json(&ExecuteRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            catalog: &self.catalog,
            schema: &self.schema,
            wait_timeout: WAIT_TIMEOUT,
            on_wait_timeout: "CONTINUE",
            format: "JSON_ARRAY",
            disposition: "INLINE",
            parameters,
        });
        let mut response: StatementResponse = self.api.send("POST", request).await?.json().await?;

        let mut interval = POLL_INTERVAL;
        while matches!(response.status.state.as_str(), "PENDING" | "RUNNING") {
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(MAX_POLL_INTERVAL);

            let url = self
                .api
                .endpoint(STATEMENTS_API, [response.statement_id.as_str()])?;
            let request = self.api.request(Method::GET, url).await?;
            response = self.api.send("GET", request).await?.json().await?;
        }

        match response.status.state.as_str() {
            "SUCCEEDED" => {}
            "FAILED" => {
                let error = response.status.error.unwrap_or(StatementError {
                    error_code: None,
                    message: None,
                });
                return Err(WarehouseError::Statement {
                    code: error.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                    message: error.message.unwrap_or_default(),
                    sql: sql.to_string(),
                });
            }
            state => {
                return Err(WarehouseError::UnexpectedState {
                    statement_id: response.statement_id,
                    state: state.to_string(),
                })
            }
        }

        let mut result = response.result.unwrap_or_default();
        let mut rows = std::mem::take(&mut result.data_array);
        let mut next_chunk = result.next_chunk_index;
        while let Some(index) = next_chunk {
            let chunk = index.to_string();
            let url = self.api.endpoint(
                STATEMENTS_API,
                [response.statement_id.as_str(), "result", "chunks", chunk.as_str()],
            )?;
            let request = self.api.request(Method::GET, url).await?;
            let data: ResultData = self.api.send("GET", request).await?.json().await?;
            rows.extend(data.data_array);
            next_chunk = data.next_chunk_index;
        }
        Ok(rows)
    }

    /// Catalog/schema/table predicates; names are stored lower-case in information_schema.
    fn metadata_filter(
        prefix: &str,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> (String, Vec<StatementParameter>) {
        let mut clauses = vec![format!("{}table_name = lower(:table)", prefix)];
        let mut parameters = vec![StatementParameter::string("table", table)];
        if let Some(catalog) = catalog {
            clauses.push(format!("{}table_catalog = lower(:catalog)", prefix));
            parameters.push(StatementParameter::string("catalog", catalog));
        }
        if let Some(schema) = schema {
            clauses.push(format!("{}table_schema = lower(:schema)", prefix));
            parameters.push(StatementParameter::string("schema", schema));
        }
        (clauses.join(" AND "), parameters)
    }
}

fn text(row: &[Option<String>], index: usize) -> Result<String, WarehouseError> {
    row.get(index)
        .cloned()
        .flatten()
        .ok_or_else(|| WarehouseError::Protocol(format!("missing value in column {}", index)))
}

fn number(row: &[Option<String>], index: usize) -> Result<Option<u32>, WarehouseError> {
    match row.get(index).and_then(|v| v.as_deref()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|e| WarehouseError::Protocol(format!("column {}: {}", index, e))),
    }
}

#[async_trait]
impl WarehouseConnection for StatementConnection {
    fn active_catalog(&self) -> &str {
        &self.catalog
    }

    fn active_schema(&self) -> &str {
        &self.schema
    }

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        self.query(sql, &[]).await?;
        Ok(())
    }

    async fn execute_update(&self, sql: &str) -> Result<u64, WarehouseError> {
        let rows = self.query(sql, &[]).await?;
        // DML and COPY report num_affected_rows first
        let affected = rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(affected)
    }

    async fn commit(&self) -> Result<(), WarehouseError> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), WarehouseError> {
        debug!("Statements run in autocommit mode; nothing to roll back");
        Ok(())
    }

    async fn list_tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<TableRow>, WarehouseError> {
        let (filter, parameters) = Self::metadata_filter("", catalog, schema, table);
        let sql = format!(
            "SELECT table_catalog, table_schema, table_name \
             FROM system.information_schema.tables WHERE {}",
            filter
        );
        self.query(&sql, &parameters)
            .await?
            .iter()
            .map(|row| {
                Ok(TableRow {
                    catalog: text(row, 0)?,
                    schema: text(row, 1)?,
                    name: text(row, 2)?,
                })
            })
            .collect()
    }

    async fn list_columns(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ColumnRow>, WarehouseError> {
        let (filter, parameters) = Self::metadata_filter("", catalog, schema, table);
        // interval and TIMESTAMP_NTZ columns cannot be described to the loader
        let sql = format!(
            "SELECT table_catalog, table_schema, table_name, column_name, data_type, \
             character_maximum_length, numeric_precision, numeric_scale, \
             character_octet_length, is_nullable \
             FROM system.information_schema.columns \
             WHERE {} AND data_type NOT LIKE 'INTERVAL%' AND data_type <> 'TIMESTAMP_NTZ' \
             ORDER BY table_catalog, table_schema, table_name, ordinal_position",
            filter
        );
        self.query(&sql, &parameters)
            .await?
            .iter()
            .map(|row| {
                let type_name = text(row, 4)?;
                let is_decimal = type_name.eq_ignore_ascii_case("DECIMAL");
                let column_size = number(row, 5)?.or(number(row, 6)?).unwrap_or(0);
                Ok(ColumnRow {
                    catalog: text(row, 0)?,
                    schema: text(row, 1)?,
                    table: text(row, 2)?,
                    column_name: text(row, 3)?,
                    type_name,
                    column_size,
                    decimal_digits: if is_decimal { number(row, 7)? } else { None },
                    char_octet_length: number(row, 8)?.unwrap_or(0),
                    nullable: !text(row, 9)?.eq_ignore_ascii_case("NO"),
                })
            })
            .collect()
    }

    async fn list_primary_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<PrimaryKeyRow>, WarehouseError> {
        let (filter, parameters) = Self::metadata_filter("kcu.", catalog, schema, table);
        let sql = format!(
            "SELECT kcu.table_catalog, kcu.table_schema, kcu.table_name, kcu.column_name \
             FROM system.information_schema.table_constraints tc \
             JOIN system.information_schema.key_column_usage kcu \
             ON tc.constraint_catalog = kcu.constraint_catalog \
             AND tc.constraint_schema = kcu.constraint_schema \
             AND tc.constraint_name = kcu.constraint_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' AND {} \
             ORDER BY kcu.ordinal_position",
            filter
        );
        self.query(&sql, &parameters)
            .await?
            .iter()
            .map(|row| {
                Ok(PrimaryKeyRow {
                    catalog: text(row, 0)?,
                    schema: text(row, 1)?,
                    table: text(row, 2)?,
                    column_name: text(row, 3)?,
                })
            })
            .collect()
    }
}
