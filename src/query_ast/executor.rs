//! Engine abstraction used by the evaluator.
//!
//! An engine accepts parameterized SQL text and hands back a schema and a sequence of
//! columnar batches. The evaluator never talks to a database crate directly.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use super::errors::QueryAstError;
use super::inference::{BoundParam, SchemaMap, TypeFamily, type_family};

/// One result column of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub declared_type: String,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match type_family(&self.declared_type) {
            TypeFamily::Integer => DataType::Int64,
            TypeFamily::Float => DataType::Float64,
            TypeFamily::Boolean => DataType::Boolean,
            TypeFamily::Binary => DataType::Binary,
            TypeFamily::Text | TypeFamily::Other => DataType::Utf8,
        }
    }
}

/// `column_name -> declared_type`; later duplicates win.
pub fn schema_map(columns: &[ColumnDescription]) -> SchemaMap {
    columns
        .iter()
        .map(|c| (c.name.clone(), c.declared_type.clone()))
        .collect()
}

/// Columnar interchange schema for a described result.
pub fn arrow_schema(columns: &[ColumnDescription]) -> SchemaRef {
    let fields = columns
        .iter()
        .map(|c| Field::new(&c.name, c.arrow_type(), true))
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

/// Receives result batches as the engine produces them.
pub type BatchSink<'a> = dyn FnMut(RecordBatch) -> Result<(), QueryAstError> + Send + 'a;

#[async_trait::async_trait]
pub trait QueryEngine: Send {
    fn name(&self) -> &'static str;

    /// Prepares `sql` without running it and reports its result columns.
    async fn describe(&mut self, sql: &str) -> Result<Vec<ColumnDescription>, QueryAstError>;

    /// Describes a parameter-free statement whose columns are used to type literals.
    /// Engines that cannot type every column statically may run `sql` to find out.
    async fn describe_sources(&mut self, sql: &str) -> Result<Vec<ColumnDescription>, QueryAstError> {
        self.describe(sql).await
    }

    /// Runs `sql` with `params` bound in order, calling `sink` with batches of at most
    /// `batch_size` rows shaped by `schema`. Empty batches are never delivered.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[BoundParam],
        schema: SchemaRef,
        batch_size: usize,
        sink: &mut BatchSink<'_>,
    ) -> Result<(), QueryAstError>;
}
