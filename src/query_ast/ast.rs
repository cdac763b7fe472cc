//! Query fragments: the clauses a pipeline stage can contribute to a plan.
//!
//! Every fragment renders to a piece of SQL text. Identifiers are emitted as given;
//! values never are. A condition value is either a `?` placeholder (and a bind
//! parameter) or the literal `NULL`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::alias::AliasGenerator;

/// Literal value carried by a condition.
///
/// `Unknown` holds text whose SQL type is decided at evaluation time from the
/// schema of the column it is compared with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryParam {
    Numeric(i64),
    Text(String),
    Unknown(String),
}

impl QueryParam {
    pub fn null() -> Self {
        QueryParam::Unknown("NULL".to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryParam::Unknown(s) if s == "NULL")
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            QueryParam::Numeric(_) => "INTEGER",
            QueryParam::Text(_) => "TEXT",
            QueryParam::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryParam::Numeric(n) => write!(f, "{}({})", n, self.type_name()),
            QueryParam::Text(s) | QueryParam::Unknown(s) => write!(f, "{}({})", s, self.type_name()),
        }
    }
}

/// A bind parameter together with the column it is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnParam {
    pub column: String,
    pub value: QueryParam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub predicate: String,
    pub value: QueryParam,
}

impl Condition {
    pub fn new(column: impl Into<String>, predicate: impl Into<String>, value: QueryParam) -> Self {
        Self {
            column: column.into(),
            predicate: predicate.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: String,
    pub predicate: String,
    pub right: String,
}

impl JoinCondition {
    pub fn new(left: impl Into<String>, predicate: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            predicate: predicate.into(),
            right: right.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectFragment {
    #[serde(rename = "tablename")]
    pub tablenames: Vec<String>,
    pub alias: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl SelectFragment {
    pub fn new(tablenames: Vec<String>, columns: Vec<String>, alias: Option<String>) -> Self {
        Self {
            tablenames,
            alias,
            columns,
        }
    }

    /// `SELECT * FROM <table>`
    pub fn all_of(table: impl Into<String>) -> Self {
        Self::new(vec![table.into()], vec!["*".to_string()], None)
    }

    /// Appends `*` to the column list unless every source column is already selected.
    pub fn widen(&mut self) {
        if !self.columns.is_empty() && !self.columns.iter().any(|c| c.trim() == "*") {
            self.columns.push("*".to_string());
        }
    }

    pub fn render(&self, aliases: &mut AliasGenerator) -> String {
        let alias = self.alias.clone().unwrap_or_else(|| aliases.next());
        match self.tablenames.as_slice() {
            [table] => self.single_table(table, Some(&alias)),
            tables => {
                let union = tables
                    .iter()
                    .map(|t| self.single_table(t, None))
                    .collect::<Vec<_>>()
                    .join(" UNION ALL ");
                format!("SELECT {} FROM ({}) AS {}", self.columns_clause(), union, alias)
            }
        }
    }

    fn single_table(&self, table: &str, alias: Option<&str>) -> String {
        match alias {
            Some(a) => format!("SELECT {} FROM {} AS {}", self.columns_clause(), table, a),
            None => format!("SELECT {} FROM {}", self.columns_clause(), table),
        }
    }

    fn columns_clause(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinFragment {
    pub table: String,
    pub alias: Option<String>,
    pub how: String,
    #[serde(default)]
    pub conditions: Vec<JoinCondition>,
}

impl JoinFragment {
    pub fn new(
        table: impl Into<String>,
        how: impl Into<String>,
        conditions: Vec<JoinCondition>,
        alias: Option<String>,
    ) -> Self {
        Self {
            table: table.into(),
            alias,
            how: how.into(),
            conditions,
        }
    }

    pub fn render(&self) -> String {
        let mut sql = format!("{} JOIN {}", self.how, self.table);
        if let Some(alias) = &self.alias {
            sql.push_str(&format!(" AS {}", alias));
        }
        if !self.conditions.is_empty() {
            let on = self
                .conditions
                .iter()
                .map(|c| format!("{} {} {}", c.left, c.predicate, c.right))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" ON {}", on));
        }
        sql
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereFragment {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl WhereFragment {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn render(&self) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }
        let clauses = self
            .conditions
            .iter()
            .map(|c| {
                let placeholder = if c.value.is_null() { "NULL" } else { "?" };
                format!("{} {} {}", c.column, c.predicate, placeholder)
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("WHERE {}", clauses)
    }

    /// One parameter per non-NULL condition, in declaration order.
    pub fn params(&self) -> Vec<ColumnParam> {
        self.conditions
            .iter()
            .filter(|c| !c.value.is_null())
            .map(|c| ColumnParam {
                column: c.column.clone(),
                value: c.value.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitFragment {
    #[serde(rename = "limit")]
    pub n: u32,
}

impl LimitFragment {
    pub fn new(n: u32) -> Self {
        Self { n }
    }

    pub fn render(&self) -> String {
        format!("LIMIT {}", self.n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFragment {
    #[serde(rename = "reversed")]
    pub reverse: bool,
    #[serde(rename = "fields", default)]
    pub columns: Vec<String>,
}

impl OrderFragment {
    pub fn new(columns: Vec<String>, reverse: bool) -> Self {
        Self { reverse, columns }
    }

    pub fn render(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let direction = if self.reverse { "DESC" } else { "ASC" };
        let items = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c, direction))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ORDER BY {}", items)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlFragment {
    #[serde(rename = "sql")]
    pub text: String,
}

impl SqlFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn render(&self) -> String {
        self.text.clone()
    }
}

/// The closed set of clauses a pipeline stage can set on a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Select(SelectFragment),
    Join(JoinFragment),
    Where(WhereFragment),
    Limit(LimitFragment),
    Order(OrderFragment),
    RawSql(SqlFragment),
}

impl Fragment {
    pub fn render(&self, aliases: &mut AliasGenerator) -> String {
        match self {
            Fragment::Select(f) => f.render(aliases),
            Fragment::Join(f) => f.render(),
            Fragment::Where(f) => f.render(),
            Fragment::Limit(f) => f.render(),
            Fragment::Order(f) => f.render(),
            Fragment::RawSql(f) => f.render(),
        }
    }

    pub fn params(&self) -> Vec<ColumnParam> {
        match self {
            Fragment::Where(f) => f.params(),
            Fragment::Select(_)
            | Fragment::Join(_)
            | Fragment::Limit(_)
            | Fragment::Order(_)
            | Fragment::RawSql(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_marker() {
        assert!(QueryParam::null().is_null());
        assert!(!QueryParam::Text("NULL".into()).is_null());
        assert!(!QueryParam::Unknown("null".into()).is_null());
    }

    #[test]
    fn single_table_uses_explicit_alias_without_consuming() {
        let mut aliases = AliasGenerator::new();
        let select = SelectFragment::new(vec!["events".into()], vec!["*".into()], Some("e".into()));
        assert_eq!(select.render(&mut aliases), "SELECT * FROM events AS e");
        assert_eq!(aliases.next(), "t1");
    }

    #[test]
    fn multi_table_union_all() {
        let mut aliases = AliasGenerator::new();
        let select = SelectFragment::new(
            vec!["a".into(), "b".into()],
            vec!["id".into(), "name".into()],
            None,
        );
        assert_eq!(
            select.render(&mut aliases),
            "SELECT id, name FROM (SELECT id, name FROM a UNION ALL SELECT id, name FROM b) AS t1"
        );
    }

    #[test]
    fn join_with_several_conditions() {
        let join = JoinFragment::new(
            "users",
            "LEFT",
            vec![
                JoinCondition::new("t1.user_id", "=", "users.id"),
                JoinCondition::new("t1.org", "=", "users.org"),
            ],
            None,
        );
        assert_eq!(
            join.render(),
            "LEFT JOIN users ON t1.user_id = users.id AND t1.org = users.org"
        );
    }

    #[test]
    fn where_null_is_inlined_and_not_bound() {
        let where_ = WhereFragment::default()
            .and(Condition::new("a", "=", QueryParam::Numeric(1)))
            .and(Condition::new("b", "IS", QueryParam::null()))
            .and(Condition::new("c", "LIKE", QueryParam::Unknown("x%".into())));
        assert_eq!(where_.render(), "WHERE a = ? AND b IS NULL AND c LIKE ?");
        let params = where_.params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].column, "a");
        assert_eq!(params[1].column, "c");
    }

    #[test]
    fn order_direction_applies_to_every_column() {
        let order = OrderFragment::new(vec!["a".into(), "b".into()], true);
        assert_eq!(order.render(), "ORDER BY a DESC, b DESC");
        let order = OrderFragment::new(vec!["a".into()], false);
        assert_eq!(order.render(), "ORDER BY a ASC");
    }

    #[test]
    fn only_where_contributes_params() {
        let mut aliases = AliasGenerator::new();
        let limit = Fragment::Limit(LimitFragment::new(3));
        assert_eq!(limit.render(&mut aliases), "LIMIT 3");
        assert!(limit.params().is_empty());
        let raw = Fragment::RawSql(SqlFragment::new("SELECT 1"));
        assert_eq!(raw.render(&mut aliases), "SELECT 1");
        assert!(raw.params().is_empty());
    }

    #[test]
    fn param_display() {
        assert_eq!(QueryParam::Numeric(5).to_string(), "5(INTEGER)");
        assert_eq!(QueryParam::Unknown("x".into()).to_string(), "x(UNKNOWN)");
    }
}
