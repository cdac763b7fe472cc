//! Evaluation-time typing of untyped condition literals.
//!
//! Pipeline tools rarely know the type of the column a literal is compared with, so
//! `QueryParam::Unknown` values are resolved against the declared column types of the
//! statement being evaluated.

use std::collections::HashMap;

use log::debug;

use super::alias::AliasGenerator;
use super::ast::{ColumnParam, QueryParam};
use super::errors::QueryAstError;
use super::logical::OverallQueryPlan;

/// Column name to declared SQL type, as reported by the engine.
pub type SchemaMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Text,
    Boolean,
    Binary,
    Other,
}

/// Classifies a declared type name (`BIGINT`, `VARCHAR(20)`, `double precision`, ...).
pub fn type_family(declared: &str) -> TypeFamily {
    let upper = declared.trim().to_ascii_uppercase();
    let name = upper.split('(').next().unwrap_or_default().trim();

    if name.contains("INT") && !name.starts_with("INTERVAL") && !name.contains("POINT") {
        TypeFamily::Integer
    } else if ["REAL", "DOUBLE", "FLOAT", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
    {
        TypeFamily::Float
    } else if name.contains("CHAR") || matches!(name, "TEXT" | "STRING" | "CLOB") {
        TypeFamily::Text
    } else if matches!(name, "BOOLEAN" | "BOOL") {
        TypeFamily::Boolean
    } else if matches!(name, "BLOB" | "BYTEA" | "BINARY" | "VARBINARY") {
        TypeFamily::Binary
    } else {
        TypeFamily::Other
    }
}

/// A parameter value ready to hand to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundParam {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Finds the declared type of `column`, falling back to its unqualified name.
pub fn lookup<'a>(schema: &'a SchemaMap, column: &str) -> Option<&'a str> {
    schema
        .get(column)
        .or_else(|| {
            column
                .rsplit_once('.')
                .and_then(|(_, tail)| schema.get(tail))
        })
        .map(String::as_str)
}

pub fn bind_param(param: &ColumnParam, schema: &SchemaMap) -> Result<BoundParam, QueryAstError> {
    let literal = match &param.value {
        QueryParam::Numeric(n) => return Ok(BoundParam::Integer(*n)),
        QueryParam::Text(s) => return Ok(BoundParam::Text(s.clone())),
        QueryParam::Unknown(s) => s,
    };

    let declared = lookup(schema, &param.column).ok_or_else(|| QueryAstError::SchemaLookup {
        column: param.column.clone(),
    })?;

    let coercion_error = |target: &'static str, reason: String| QueryAstError::TypeCoercion {
        column: param.column.clone(),
        literal: literal.clone(),
        target,
        reason,
    };

    match type_family(declared) {
        TypeFamily::Integer => literal
            .trim()
            .parse::<i64>()
            .map(BoundParam::Integer)
            .map_err(|e| coercion_error("integer", e.to_string())),
        TypeFamily::Float => literal
            .trim()
            .parse::<f64>()
            .map(BoundParam::Float)
            .map_err(|e| coercion_error("float", e.to_string())),
        TypeFamily::Text => Ok(BoundParam::Text(literal.clone())),
        TypeFamily::Boolean | TypeFamily::Binary | TypeFamily::Other => {
            Err(QueryAstError::UnsupportedColumnType {
                column: param.column.clone(),
                declared: declared.to_string(),
            })
        }
    }
}

/// Resolves every parameter, in order. NULL markers never reach this list.
pub fn bind_params(params: &[ColumnParam], schema: &SchemaMap) -> Result<Vec<BoundParam>, QueryAstError> {
    params.iter().map(|p| bind_param(p, schema)).collect()
}

/// SQL whose result columns describe the row sources of `plan`.
///
/// Rendered with its own alias generator. WHERE is the only parameter source, so the
/// stripped statement must come out parameter-free.
pub fn schema_probe_sql(plan: &OverallQueryPlan) -> Result<String, QueryAstError> {
    let base = plan.base().generate(&mut AliasGenerator::new())?;
    if !base.params.is_empty() {
        return Err(QueryAstError::Programming(format!(
            "schema probe query carries {} parameters, expected none",
            base.params.len()
        )));
    }
    debug!("schema probe: {}", base.text);
    Ok(base.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(pairs: &[(&str, &str)]) -> SchemaMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn unknown(column: &str, literal: &str) -> ColumnParam {
        ColumnParam {
            column: column.into(),
            value: QueryParam::Unknown(literal.into()),
        }
    }

    #[test]
    fn families() {
        assert_eq!(type_family("BIGINT"), TypeFamily::Integer);
        assert_eq!(type_family("integer"), TypeFamily::Integer);
        assert_eq!(type_family("SMALLINT"), TypeFamily::Integer);
        assert_eq!(type_family("INTERVAL"), TypeFamily::Other);
        assert_eq!(type_family("DOUBLE"), TypeFamily::Float);
        assert_eq!(type_family("REAL"), TypeFamily::Float);
        assert_eq!(type_family("DECIMAL(10,2)"), TypeFamily::Float);
        assert_eq!(type_family("VARCHAR(20)"), TypeFamily::Text);
        assert_eq!(type_family("TEXT"), TypeFamily::Text);
        assert_eq!(type_family("BOOLEAN"), TypeFamily::Boolean);
        assert_eq!(type_family("DATE"), TypeFamily::Other);
    }

    #[test]
    fn integer_literal_on_bigint_column() {
        let s = schema(&[("age", "BIGINT")]);
        assert_eq!(bind_param(&unknown("age", "42"), &s).unwrap(), BoundParam::Integer(42));
    }

    #[test]
    fn non_numeric_literal_on_bigint_column() {
        let s = schema(&[("age", "BIGINT")]);
        match bind_param(&unknown("age", "abc"), &s) {
            Err(QueryAstError::TypeCoercion { column, literal, .. }) => {
                assert_eq!(column, "age");
                assert_eq!(literal, "abc");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn float_and_text_columns() {
        let s = schema(&[("score", "DOUBLE"), ("name", "VARCHAR")]);
        assert_eq!(bind_param(&unknown("score", "1.5"), &s).unwrap(), BoundParam::Float(1.5));
        assert_eq!(
            bind_param(&unknown("name", "bob"), &s).unwrap(),
            BoundParam::Text("bob".into())
        );
    }

    #[test]
    fn missing_column() {
        let s = schema(&[("age", "BIGINT")]);
        assert!(matches!(
            bind_param(&unknown("height", "3"), &s),
            Err(QueryAstError::SchemaLookup { column }) if column == "height"
        ));
    }

    #[test]
    fn qualified_column_falls_back_to_tail() {
        let s = schema(&[("age", "INTEGER")]);
        assert_eq!(bind_param(&unknown("t1.age", "7"), &s).unwrap(), BoundParam::Integer(7));
    }

    #[test]
    fn unsupported_type() {
        let s = schema(&[("born", "DATE")]);
        assert!(matches!(
            bind_param(&unknown("born", "2020-01-01"), &s),
            Err(QueryAstError::UnsupportedColumnType { .. })
        ));
    }

    #[test]
    fn typed_params_bypass_schema() {
        let empty = SchemaMap::new();
        let numeric = ColumnParam {
            column: "nowhere".into(),
            value: QueryParam::Numeric(3),
        };
        let text = ColumnParam {
            column: "nowhere".into(),
            value: QueryParam::Text("3".into()),
        };
        assert_eq!(
            bind_params(&[numeric, text], &empty).unwrap(),
            vec![BoundParam::Integer(3), BoundParam::Text("3".into())]
        );
    }

    #[test]
    fn filter_on_unselected_column_still_described() {
        use crate::query_ast::ast::{Condition, Fragment, SelectFragment};
        use crate::query_ast::logical::QueryPlan;

        let plan = OverallQueryPlan::new().push(
            QueryPlan::new()
                .with(Fragment::Select(SelectFragment::new(
                    vec!["people".into()],
                    vec!["id".into()],
                    None,
                )))
                .and_where(Condition::new("age", "LIKE", QueryParam::Unknown("42".into()))),
        );
        assert_eq!(schema_probe_sql(&plan).unwrap(), "SELECT id, * FROM people AS t1");
    }
}
