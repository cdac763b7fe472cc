//! Query plans: one statement's worth of fragments, and the CTE chain that composes them.

use serde::{Deserialize, Serialize};

use super::alias::AliasGenerator;
use super::ast::{
    ColumnParam, Condition, Fragment, JoinFragment, LimitFragment, OrderFragment, SelectFragment,
    SqlFragment, WhereFragment,
};
use super::errors::QueryAstError;

/// SQL text with its bind parameters in placeholder order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterizedQuery {
    pub text: String,
    pub params: Vec<ColumnParam>,
}

/// At most one fragment of each kind. A raw SQL fragment, when present, wins over
/// everything else on the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default)]
    pub select: Option<SelectFragment>,
    #[serde(default)]
    pub join: Option<JoinFragment>,
    #[serde(rename = "where", default)]
    pub where_: Option<WhereFragment>,
    #[serde(default)]
    pub limit: Option<LimitFragment>,
    #[serde(default)]
    pub order: Option<OrderFragment>,
    #[serde(default)]
    pub sql: Option<SqlFragment>,
}

impl QueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the plan with the slot for `fragment`'s kind replaced.
    pub fn with(mut self, fragment: Fragment) -> Self {
        match fragment {
            Fragment::Select(f) => self.select = Some(f),
            Fragment::Join(f) => self.join = Some(f),
            Fragment::Where(f) => self.where_ = Some(f),
            Fragment::Limit(f) => self.limit = Some(f),
            Fragment::Order(f) => self.order = Some(f),
            Fragment::RawSql(f) => self.sql = Some(f),
        }
        self
    }

    /// Appends a condition to the WHERE clause, creating it on first use.
    pub fn and_where(self, condition: Condition) -> Self {
        let where_ = self.where_.clone().unwrap_or_default().and(condition);
        self.with(Fragment::Where(where_))
    }

    /// The plan's row source only: WHERE, ORDER BY and LIMIT removed.
    pub fn base(&self) -> Self {
        Self {
            select: self.select.clone(),
            join: self.join.clone(),
            where_: None,
            limit: None,
            order: None,
            sql: self.sql.clone(),
        }
    }

    /// The explicit alias of the SELECT, used as CTE name when this plan is chained.
    pub fn alias(&self) -> Option<&str> {
        self.select.as_ref().and_then(|s| s.alias.as_deref())
    }

    pub fn generate(&self, aliases: &mut AliasGenerator) -> Result<ParameterizedQuery, QueryAstError> {
        if let Some(sql) = &self.sql {
            return Ok(ParameterizedQuery {
                text: sql.render(),
                params: Vec::new(),
            });
        }
        let select = self.select.as_ref().ok_or(QueryAstError::MissingSelect)?;
        if select.tablenames.is_empty() {
            return Err(QueryAstError::NoSourceTable);
        }

        let mut clauses = vec![select.render(aliases)];
        let mut params = Vec::new();
        if let Some(join) = &self.join {
            clauses.push(join.render());
        }
        if let Some(where_) = &self.where_ {
            clauses.push(where_.render());
            params.extend(where_.params());
        }
        if let Some(order) = &self.order {
            clauses.push(order.render());
        }
        if let Some(limit) = &self.limit {
            clauses.push(limit.render());
        }
        clauses.retain(|c| !c.is_empty());

        Ok(ParameterizedQuery {
            text: clauses.join(" "),
            params,
        })
    }
}

/// Ordered chain of plans; every plan but the last becomes a named CTE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallQueryPlan {
    #[serde(default)]
    pub plans: Vec<QueryPlan>,
}

impl OverallQueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn last(&self) -> Option<&QueryPlan> {
        self.plans.last()
    }

    /// Returns the chain with `plan` appended.
    pub fn push(mut self, plan: QueryPlan) -> Self {
        self.plans.push(plan);
        self
    }

    /// Returns the chain with its last plan replaced by `f(last)`.
    pub fn map_last<F>(mut self, f: F) -> Result<Self, QueryAstError>
    where
        F: FnOnce(QueryPlan) -> Result<QueryPlan, QueryAstError>,
    {
        let last = self.plans.pop().ok_or(QueryAstError::EmptyPlan)?;
        self.plans.push(f(last)?);
        Ok(self)
    }

    /// Every plan reduced to its row source. Renders with no bind parameters.
    ///
    /// The last plan also selects `*` after its own columns, so every column a WHERE
    /// on that plan can name shows up in the result. Earlier plans keep their column
    /// lists; later plans read them as CTEs.
    pub fn base(&self) -> Self {
        let mut plans: Vec<QueryPlan> = self.plans.iter().map(QueryPlan::base).collect();
        if let Some(select) = plans.last_mut().and_then(|p| p.select.as_mut()) {
            select.widen();
        }
        Self { plans }
    }

    pub fn generate(&self, aliases: &mut AliasGenerator) -> Result<ParameterizedQuery, QueryAstError> {
        if self.plans.is_empty() {
            return Err(QueryAstError::EmptyPlan);
        }
        let last_index = self.plans.len() - 1;
        let mut text = String::new();
        let mut params = Vec::new();

        for (index, plan) in self.plans.iter().enumerate() {
            let is_cte = index < last_index;
            if is_cte {
                text.push_str(if index == 0 { "WITH " } else { ", " });
                // CTE name is taken before the body renders so it gets the lower number.
                let name = match plan.alias() {
                    Some(alias) => alias.to_string(),
                    None => aliases.next(),
                };
                text.push_str(&name);
                text.push_str(" AS (");
            }

            let query = plan.generate(aliases).map_err(|e| QueryAstError::PlanIndex {
                index,
                source: Box::new(e),
            })?;
            text.push_str(&query.text);
            params.extend(query.params);

            if is_cte {
                text.push_str(") ");
            }
        }

        Ok(ParameterizedQuery { text, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::ast::{JoinCondition, QueryParam};

    fn cat(table: &str) -> QueryPlan {
        QueryPlan::new().with(Fragment::Select(SelectFragment::all_of(table)))
    }

    #[test]
    fn raw_sql_takes_precedence() {
        let plan = cat("events").with(Fragment::RawSql(SqlFragment::new("SELECT 42")));
        let q = plan.generate(&mut AliasGenerator::new()).unwrap();
        assert_eq!(q.text, "SELECT 42");
        assert!(q.params.is_empty());
    }

    #[test]
    fn missing_select_fails() {
        let plan = QueryPlan::new().with(Fragment::Limit(LimitFragment::new(1)));
        let err = plan.generate(&mut AliasGenerator::new()).unwrap_err();
        assert!(matches!(err, QueryAstError::MissingSelect));
    }

    #[test]
    fn select_without_tables_fails() {
        let plan = QueryPlan::new().with(Fragment::Select(SelectFragment::new(Vec::new(), vec!["*".into()], None)));
        let err = plan.generate(&mut AliasGenerator::new()).unwrap_err();
        assert!(matches!(err, QueryAstError::NoSourceTable));
        assert_eq!(err.exit_status().code(), 1);
    }

    #[test]
    fn fixed_emission_order() {
        let plan = cat("events")
            .with(Fragment::Limit(LimitFragment::new(5)))
            .with(Fragment::Order(OrderFragment::new(vec!["ts".into()], true)))
            .and_where(Condition::new("kind", "=", QueryParam::Text("click".into())))
            .with(Fragment::Join(JoinFragment::new(
                "users",
                "INNER",
                vec![JoinCondition::new("t1.uid", "=", "users.id")],
                None,
            )));
        let q = plan.generate(&mut AliasGenerator::new()).unwrap();
        assert_eq!(
            q.text,
            "SELECT * FROM events AS t1 INNER JOIN users ON t1.uid = users.id WHERE kind = ? ORDER BY ts DESC LIMIT 5"
        );
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn base_strips_parameter_sources() {
        let plan = cat("events")
            .and_where(Condition::new("a", "=", QueryParam::Numeric(1)))
            .with(Fragment::Limit(LimitFragment::new(5)));
        let base = plan.base();
        assert!(base.where_.is_none() && base.limit.is_none() && base.order.is_none());
        assert!(base.select.is_some());
    }

    #[test]
    fn chain_base_widens_only_the_last_select() {
        let narrow = |table: &str| {
            QueryPlan::new()
                .with(Fragment::Select(SelectFragment::new(
                    vec![table.into()],
                    vec!["id".into(), "name".into()],
                    None,
                )))
                .and_where(Condition::new("age", "=", QueryParam::Numeric(42)))
        };
        let single = OverallQueryPlan::new().push(narrow("people")).base();
        let q = single.generate(&mut AliasGenerator::new()).unwrap();
        assert_eq!(q.text, "SELECT id, name, * FROM people AS t1");
        assert!(q.params.is_empty());

        let chained = OverallQueryPlan::new().push(narrow("people")).push(cat("t1")).base();
        let q = chained.generate(&mut AliasGenerator::new()).unwrap();
        assert_eq!(q.text, "WITH t1 AS (SELECT id, name FROM people AS t2) SELECT * FROM t1 AS t3");
    }

    #[test]
    fn chain_names_ctes_before_rendering_bodies() {
        let overall = OverallQueryPlan::new().push(cat("a")).push(cat("b"));
        let q = overall.generate(&mut AliasGenerator::new()).unwrap();
        assert_eq!(q.text, "WITH t1 AS (SELECT * FROM a AS t2) SELECT * FROM b AS t3");
    }

    #[test]
    fn chain_failure_reports_index() {
        let overall = OverallQueryPlan::new().push(cat("a")).push(QueryPlan::new());
        match overall.generate(&mut AliasGenerator::new()) {
            Err(QueryAstError::PlanIndex { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, QueryAstError::MissingSelect));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn map_last_on_empty_chain() {
        let err = OverallQueryPlan::new().map_last(Ok).unwrap_err();
        assert!(matches!(err, QueryAstError::EmptyPlan));
    }
}
