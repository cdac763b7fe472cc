//! SQLite engine, embedded through sqlx

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, info};
use sqlx::sqlite::{SqliteColumn, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Decode, Executor, Row, Sqlite, Statement, TypeInfo, ValueRef};

use crate::datasets::{self, FileColumnType, quote_identifier};
use crate::query_ast::errors::QueryAstError;
use crate::query_ast::executor::{BatchSink, ColumnDescription, QueryEngine};
use crate::query_ast::inference::BoundParam;

pub struct SqliteEngine {
    conn: SqliteConnection,
}

impl SqliteEngine {
    /// Opens one connection. `database` is a `sqlite:` URL, `:memory:`, or a file path
    /// (created if missing).
    pub async fn connect(database: &str) -> Result<Self, QueryAstError> {
        let options = connect_options(database)?;
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| QueryAstError::execution(database, e))?;
        info!("SqliteEngine: connected to {}", database);
        Ok(Self { conn })
    }

    /// Runs a setup script (one or more statements) and discards any results.
    pub async fn run_script(&mut self, script: &str) -> Result<(), QueryAstError> {
        debug!("SqliteEngine: running script ({} bytes)", script.len());
        (&mut self.conn)
            .execute(script)
            .await
            .map_err(|e| QueryAstError::execution(script, e))?;
        Ok(())
    }

    /// Loads a delimited file into a temporary table named `table`. Returns the row count.
    pub async fn load_file(&mut self, table: &str, path: &Path) -> Result<usize, QueryAstError> {
        let columns = datasets::infer_columns(path)?;
        let definitions = columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql_name()))
            .collect::<Vec<_>>()
            .join(", ");
        self.run_script(&format!("CREATE TEMP TABLE {} ({})", quote_identifier(table), definitions))
            .await?;

        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            quote_identifier(table),
            vec!["?"; columns.len()].join(", ")
        );
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|e| QueryAstError::execution(&insert, e))?;
        let mut reader = datasets::open_reader(path)?;
        let mut rows = 0usize;
        for record in reader.records() {
            let record = record.map_err(|e| datasets::file_error(path, e))?;
            let mut query = sqlx::query(&insert);
            for (index, column) in columns.iter().enumerate() {
                let cell = record.get(index).filter(|c| !c.is_empty());
                query = match column.column_type {
                    FileColumnType::Integer => query.bind(cell.and_then(|c| c.parse::<i64>().ok())),
                    FileColumnType::Real => query.bind(cell.and_then(|c| c.parse::<f64>().ok())),
                    FileColumnType::Text => query.bind(cell.map(str::to_string)),
                };
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| QueryAstError::execution(&insert, e))?;
            rows += 1;
        }
        tx.commit().await.map_err(|e| QueryAstError::execution(&insert, e))?;
        info!("SqliteEngine: loaded {} rows from {} into {}", rows, path.display(), table);
        Ok(rows)
    }

    /// Storage class of the first non-NULL value of `column` in the result of `sql`.
    async fn storage_class(&mut self, sql: &str, column: &str) -> Option<String> {
        let column = quote_identifier(column);
        let sample = format!(
            "SELECT typeof({column}) FROM ({}) WHERE {column} IS NOT NULL LIMIT 1",
            sql.trim().trim_end_matches(';')
        );
        match sqlx::query_scalar::<_, String>(&sample)
            .fetch_optional(&mut self.conn)
            .await
        {
            Ok(class) => class.map(|c| c.to_uppercase()),
            Err(e) => {
                debug!("SqliteEngine: cannot sample {}: {}", column, e);
                None
            }
        }
    }
}

fn column_description(column: &SqliteColumn) -> ColumnDescription {
    ColumnDescription::new(column.name(), column.type_info().name())
}

fn connect_options(database: &str) -> Result<SqliteConnectOptions, QueryAstError> {
    let trimmed = database.trim();
    if trimmed.is_empty() || trimmed == ":memory:" {
        return SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| QueryAstError::Config(e.to_string()));
    }
    if trimmed.starts_with("sqlite:") {
        return SqliteConnectOptions::from_str(trimmed)
            .map_err(|e| QueryAstError::Config(format!("invalid database url '{}': {}", trimmed, e)));
    }
    Ok(SqliteConnectOptions::new()
        .filename(trimmed)
        .create_if_missing(true))
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn describe(&mut self, sql: &str) -> Result<Vec<ColumnDescription>, QueryAstError> {
        // sqlx's describe also types expressions; prepare only sees declared types.
        let columns = match (&mut self.conn).describe(sql).await {
            Ok(described) => described.columns().iter().map(column_description).collect::<Vec<_>>(),
            Err(e) => {
                debug!("SqliteEngine: describe failed ({}), reading declared types", e);
                let statement = (&mut self.conn)
                    .prepare(sql)
                    .await
                    .map_err(|e| QueryAstError::execution(sql, e))?;
                statement.columns().iter().map(column_description).collect()
            }
        };
        debug!("SqliteEngine: described {} columns", columns.len());
        Ok(columns)
    }

    async fn describe_sources(&mut self, sql: &str) -> Result<Vec<ColumnDescription>, QueryAstError> {
        let mut columns = self.describe(sql).await?;
        for column in columns.iter_mut().filter(|c| c.declared_type.eq_ignore_ascii_case("NULL")) {
            if let Some(class) = self.storage_class(sql, &column.name).await {
                debug!("SqliteEngine: column '{}' typed {} from its values", column.name, class);
                column.declared_type = class;
            }
        }
        Ok(columns)
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[BoundParam],
        schema: SchemaRef,
        batch_size: usize,
        sink: &mut BatchSink<'_>,
    ) -> Result<(), QueryAstError> {
        let batch_size = batch_size.max(1);
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                BoundParam::Integer(v) => query.bind(*v),
                BoundParam::Float(v) => query.bind(*v),
                BoundParam::Text(v) => query.bind(v.clone()),
            };
        }

        let mut rows = query.fetch(&mut self.conn);
        let mut chunk: Vec<SqliteRow> = Vec::with_capacity(batch_size);
        let mut delivered = 0usize;

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| QueryAstError::execution(sql, e))?
        {
            chunk.push(row);
            if chunk.len() == batch_size {
                sink(rows_to_batch(&chunk, &schema, sql)?)?;
                delivered += chunk.len();
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            sink(rows_to_batch(&chunk, &schema, sql)?)?;
            delivered += chunk.len();
        }

        debug!("SqliteEngine: streamed {} rows", delivered);
        Ok(())
    }
}

fn rows_to_batch(rows: &[SqliteRow], schema: &SchemaRef, sql: &str) -> Result<RecordBatch, QueryAstError> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| column_array(rows, index, field.data_type()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| QueryAstError::execution(sql, e))?;
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| QueryAstError::Programming(format!("result batch does not match schema: {}", e)))
}

fn column_array(rows: &[SqliteRow], index: usize, data_type: &DataType) -> Result<ArrayRef, sqlx::Error> {
    let array: ArrayRef = match data_type {
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(cell::<i64>(row, index)?);
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(cell::<f64>(row, index)?);
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                builder.append_option(cell::<bool>(row, index)?);
            }
            Arc::new(builder.finish())
        }
        DataType::Binary => {
            let mut builder = BinaryBuilder::new();
            for row in rows {
                builder.append_option(cell::<Vec<u8>>(row, index)?);
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for row in rows {
                builder.append_option(cell::<String>(row, index)?);
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

/// Reads a cell, letting SQLite convert between storage classes.
fn cell<'r, T>(row: &'r SqliteRow, index: usize) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, Sqlite>,
{
    if row.try_get_raw(index)?.is_null() {
        return Ok(None);
    }
    row.try_get_unchecked::<T, _>(index).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::executor::arrow_schema;
    use crate::query_ast::inference::{TypeFamily, type_family};
    use arrow::array::{Array, Int64Array, StringArray};

    const SETUP: &str = "CREATE TABLE events (id INTEGER, kind TEXT, score REAL);
        INSERT INTO events VALUES (1, 'click', 0.5), (2, 'view', NULL), (3, 'click', 2.0),
            (4, NULL, 1.0), (5, 'view', 3.5);";

    async fn engine() -> SqliteEngine {
        let mut engine = SqliteEngine::connect(":memory:").await.expect("connect");
        engine.run_script(SETUP).await.expect("setup");
        engine
    }

    #[tokio::test]
    async fn describes_table_columns() {
        let mut engine = engine().await;
        let cols = engine.describe("SELECT * FROM events AS t1").await.unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "kind", "score"]);
        assert_eq!(type_family(&cols[0].declared_type), TypeFamily::Integer);
        assert_eq!(type_family(&cols[1].declared_type), TypeFamily::Text);
        assert_eq!(type_family(&cols[2].declared_type), TypeFamily::Float);
    }

    #[tokio::test]
    async fn streams_in_bounded_batches() {
        let mut engine = engine().await;
        let sql = "SELECT id, kind FROM events ORDER BY id";
        let schema = arrow_schema(&engine.describe(sql).await.unwrap());
        let mut sizes = Vec::new();
        let mut kinds = Vec::new();
        engine
            .execute(sql, &[], schema, 2, &mut |batch: RecordBatch| -> Result<(), QueryAstError> {
                sizes.push(batch.num_rows());
                let col = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
                for i in 0..col.len() {
                    kinds.push(if col.is_null(i) { None } else { Some(col.value(i).to_string()) });
                }
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(kinds[3], None);
        assert_eq!(kinds[0].as_deref(), Some("click"));
    }

    #[tokio::test]
    async fn binds_parameters_in_order() {
        let mut engine = engine().await;
        let sql = "SELECT id FROM events WHERE kind = ? AND id > ? ORDER BY id";
        let schema = arrow_schema(&engine.describe(sql).await.unwrap());
        let params = vec![BoundParam::Text("click".into()), BoundParam::Integer(1)];
        let mut ids = Vec::new();
        engine
            .execute(sql, &params, schema, 100, &mut |batch: RecordBatch| -> Result<(), QueryAstError> {
                let col = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
                ids.extend(col.values().iter().copied());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn empty_result_delivers_no_batches() {
        let mut engine = engine().await;
        let sql = "SELECT * FROM events WHERE id > 100";
        let schema = arrow_schema(&engine.describe(sql).await.unwrap());
        let mut calls = 0;
        engine
            .execute(sql, &[], schema, 10, &mut |_batch: RecordBatch| -> Result<(), QueryAstError> {
                calls += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn aggregate_columns_are_typed_from_their_values() {
        let mut engine = engine().await;
        let sql = "WITH t1 AS (SELECT kind, count(*) AS n FROM events GROUP BY kind) SELECT * FROM t1 AS t2";
        let cols = engine.describe_sources(sql).await.unwrap();
        let n = cols.iter().find(|c| c.name == "n").unwrap();
        assert_eq!(type_family(&n.declared_type), TypeFamily::Integer);
        let kind = cols.iter().find(|c| c.name == "kind").unwrap();
        assert_eq!(type_family(&kind.declared_type), TypeFamily::Text);
    }

    #[tokio::test]
    async fn delimited_file_becomes_a_typed_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        std::fs::write(&path, "id,player,points\n1,ann,2.5\n2,,4\n3,cid,\n").unwrap();
        let mut engine = engine().await;
        let rows = engine.load_file("scores.csv", &path).await.unwrap();
        assert_eq!(rows, 3);

        let cols = engine.describe("SELECT * FROM \"scores.csv\"").await.unwrap();
        let families: Vec<_> = cols.iter().map(|c| type_family(&c.declared_type)).collect();
        assert_eq!(families, vec![TypeFamily::Integer, TypeFamily::Text, TypeFamily::Float]);

        let sql = "SELECT count(*) AS n FROM \"scores.csv\" WHERE player IS NULL OR points IS NULL";
        let schema = arrow_schema(&[ColumnDescription::new("n", "INTEGER")]);
        let mut nulls = Vec::new();
        engine
            .execute(sql, &[], schema, 10, &mut |batch: RecordBatch| -> Result<(), QueryAstError> {
                let col = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
                nulls.extend(col.values().iter().copied());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(nulls, vec![2]);
    }

    #[tokio::test]
    async fn unknown_table_is_an_execution_error() {
        let mut engine = engine().await;
        let err = engine.describe("SELECT * FROM nope").await.unwrap_err();
        assert!(matches!(err, QueryAstError::Execution { .. }));
    }
}
