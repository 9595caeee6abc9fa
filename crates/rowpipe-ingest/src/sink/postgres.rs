//! PostgreSQL sink
//!
//! One batch is one transaction. Rows are written with multi-row `INSERT`
//! statements built by [`QueryBuilder::push_values`], split so no statement exceeds
//! the protocol's bind-parameter limit.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::TransactionalSink;
use crate::batch::Batch;
use crate::config::SinkConnection;
use crate::error::CommitError;
use crate::record::FieldValue;
use crate::schema::{ColumnType, Resource, ResourceSchema, Row};

/// Bind parameters allowed in a single PostgreSQL statement
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// Quote a possibly schema-qualified identifier, e.g. `public.customers`
pub fn quote_ident(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    /// Open a pool for the configured connection
    pub async fn connect(connection: &SinkConnection) -> Result<Self, sqlx::Error> {
        info!(
            max_connections = connection.max_connections,
            connect_timeout_secs = connection.connect_timeout_secs,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(connection.max_connections)
            .acquire_timeout(Duration::from_secs(connection.connect_timeout_secs))
            .connect(&connection.url)
            .await?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_rows(&self, schema: &ResourceSchema, rows: &[Row]) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        match insert_rows(&mut tx, schema, rows).await {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, table = %schema.table, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TransactionalSink for PgSink {
    async fn commit(&mut self, batch: Batch, resource: &Resource) -> Result<u64, CommitError> {
        let rows = match resource.schema.coerce_batch(&batch) {
            Ok(rows) => rows,
            Err(violation) => return Err(CommitError::new(&resource.name, batch, violation)),
        };

        match self.write_rows(&resource.schema, &rows).await {
            Ok(written) => {
                debug!(
                    resource = %resource.name,
                    batch = batch.sequence(),
                    rows = written,
                    "Batch committed"
                );
                Ok(written)
            }
            Err(e) => Err(CommitError::new(&resource.name, batch, e)),
        }
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Rows per statement for a table with `columns` columns
fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMETERS / columns.max(1)).max(1)
}

fn insert_prefix(schema: &ResourceSchema) -> String {
    let columns = schema
        .column_names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({}) ", quote_ident(&schema.table), columns)
}

async fn insert_rows(
    tx: &mut Transaction<'_, Postgres>,
    schema: &ResourceSchema,
    rows: &[Row],
) -> Result<u64, sqlx::Error> {
    let prefix = insert_prefix(schema);
    let mut written = 0;

    for chunk in rows.chunks(rows_per_statement(schema.columns.len())) {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);

        query_builder.push_values(chunk, |mut b, row| {
            for (column, cell) in schema.columns.iter().zip(row) {
                bind_cell(&mut b, column.kind, cell.as_ref());
            }
        });

        written += query_builder.build().execute(&mut **tx).await?.rows_affected();
    }

    Ok(written)
}

/// Bind one coerced cell; NULLs carry the column's type
fn bind_cell<'args>(
    b: &mut Separated<'_, 'args, Postgres, &'static str>,
    kind: ColumnType,
    cell: Option<&'args FieldValue>,
) {
    match (kind, cell) {
        (_, Some(FieldValue::Text(s))) => b.push_bind(s.as_str()),
        (_, Some(FieldValue::Integer(i))) => b.push_bind(*i),
        (_, Some(FieldValue::Date(d))) => b.push_bind(*d),
        (ColumnType::Text, None) => b.push_bind(None::<String>),
        (ColumnType::Integer, None) => b.push_bind(None::<i64>),
        (ColumnType::Date, None) => b.push_bind(None::<NaiveDate>),
    };
}
