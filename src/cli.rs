//! Command-line surface: one subcommand per pipeline tool.
//!
//! Each tool reads a plan from stdin (unless stdin is a terminal), changes one clause and
//! either passes the plan on or, at the end of the pipe, evaluates it.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::export::OutputFormat;
use crate::query_ast::QueryAstError;

/// Build SQL queries by piping small filters together.
#[derive(Parser, Debug)]
#[command(name = "sqlpipe", version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub tool: Tool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Tool {
    /// Start a new stage reading from one or more datasets.
    Cat(CatArgs),
    /// Start a new stage from a raw SQL statement.
    Sql(SqlArgs),
    /// Choose the columns of the current stage.
    Cut(CutArgs),
    /// Filter rows of the current stage.
    Grep(GrepArgs),
    /// Limit the number of rows.
    Head(HeadArgs),
    /// Order rows by one or more fields.
    Sort(SortArgs),
    /// Join the current stage against another table.
    #[command(disable_help_flag = true)]
    Join(JoinArgs),
    /// Evaluate the plan read from stdin.
    Eval(EvalArgs),
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Cat(_) => "cat",
            Tool::Sql(_) => "sql",
            Tool::Cut(_) => "cut",
            Tool::Grep(_) => "grep",
            Tool::Head(_) => "head",
            Tool::Sort(_) => "sort",
            Tool::Join(_) => "join",
            Tool::Eval(_) => "eval",
        }
    }

    /// `cat` and `sql` start a new stage and so can run without an incoming plan.
    pub fn starts_stage(&self) -> bool {
        matches!(self, Tool::Cat(_) | Tool::Sql(_))
    }
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct CatArgs {
    /// Tables, or .csv/.tsv files, to read; several are combined with UNION ALL.
    #[arg(value_name = "DATASET", required = true, num_args = 1..)]
    pub datasets: Vec<String>,

    /// Alias for the stage, also used as its CTE name.
    #[arg(short = 'a', long = "alias")]
    pub alias: Option<String>,

    /// Only select these columns (default: all).
    #[arg(short = 'c', long = "column", value_name = "COLUMN")]
    pub columns: Vec<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct SqlArgs {
    #[arg(value_name = "SQL")]
    pub sql: String,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct CutArgs {
    #[arg(short = 'f', long = "field", value_name = "FIELD")]
    pub fields: Vec<String>,

    #[arg(value_name = "FIELD")]
    pub positional: Vec<String>,
}

impl CutArgs {
    pub fn all_fields(&self) -> Result<Vec<String>, QueryAstError> {
        let fields: Vec<String> = self.fields.iter().chain(&self.positional).cloned().collect();
        if fields.is_empty() {
            return Err(QueryAstError::Argument("cut: at least one field is required".into()));
        }
        Ok(fields)
    }
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct GrepArgs {
    /// Field to search.
    #[arg(short = 'f', long = "field")]
    pub field: Option<String>,

    /// Predicate ('=', 'LIKE', '>', ...).
    #[arg(short = 'p', long = "predicate")]
    pub predicate: Option<String>,

    /// Value to search for.
    #[arg(short = 'v', long = "value", allow_hyphen_values = true)]
    pub value: Option<String>,

    /// Value is an integer.
    #[arg(short = 'i', long = "integer", conflicts_with = "text")]
    pub integer: bool,

    /// Value is text.
    #[arg(short = 't', long = "text")]
    pub text: bool,

    /// FIELD [PREDICATE] VALUE
    #[arg(value_name = "ARG", num_args = 0..=3)]
    pub positional: Vec<String>,
}

/// A `grep` invocation with positionals folded into field, predicate and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepCondition {
    pub field: String,
    pub predicate: Option<String>,
    pub value: String,
}

impl GrepArgs {
    pub fn condition(&self) -> Result<GrepCondition, QueryAstError> {
        let mut rest = self.positional.iter().cloned();
        let field = match self.field.clone() {
            Some(f) => f,
            None => rest.next().ok_or_else(missing_grep_parts)?,
        };
        let rest: Vec<String> = rest.collect();
        let (predicate, value) = match (self.predicate.clone(), self.value.clone(), rest.as_slice()) {
            (p, Some(v), []) => (p, v),
            (p, None, [v]) => (p, v.clone()),
            (None, None, [p, v]) => (Some(p.clone()), v.clone()),
            _ => return Err(missing_grep_parts()),
        };
        Ok(GrepCondition { field, predicate, value })
    }
}

fn missing_grep_parts() -> QueryAstError {
    QueryAstError::Argument("grep: expected a field and a value (FIELD [PREDICATE] VALUE or -f/-v)".into())
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct HeadArgs {
    /// Number of rows to keep (default 10).
    #[arg(short = 'n', long = "lines")]
    pub lines: Option<u32>,

    #[arg(value_name = "LINES", conflicts_with = "lines")]
    pub count: Option<u32>,
}

impl HeadArgs {
    pub const DEFAULT_LINES: u32 = 10;

    pub fn limit(&self) -> u32 {
        self.lines.or(self.count).unwrap_or(Self::DEFAULT_LINES)
    }
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct SortArgs {
    #[arg(short = 'f', long = "field", value_name = "FIELD")]
    pub fields: Vec<String>,

    #[arg(value_name = "FIELD")]
    pub positional: Vec<String>,

    /// Sort descending.
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,
}

impl SortArgs {
    pub fn all_fields(&self) -> Result<Vec<String>, QueryAstError> {
        let fields: Vec<String> = self.fields.iter().chain(&self.positional).cloned().collect();
        if fields.is_empty() {
            return Err(QueryAstError::Argument("sort: at least one field is required".into()));
        }
        Ok(fields)
    }
}

/// `-h` selects the join type, so help is only available as `--help`.
#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct JoinArgs {
    /// Table, or .csv/.tsv file, to join against.
    #[arg(short = 't', long = "table")]
    pub table: String,

    /// Alias for the joined table.
    #[arg(short = 'a', long = "alias")]
    pub alias: Option<String>,

    /// Type of join.
    #[arg(short = 'h', long = "how", default_value = "INNER")]
    pub how: String,

    /// Column in the left hand table.
    #[arg(short = 'l', long = "left")]
    pub left: Vec<String>,

    /// Predicate ('=', '>', ...).
    #[arg(short = 'p', long = "predicate")]
    pub predicate: Vec<String>,

    /// Column in the right hand table.
    #[arg(short = 'r', long = "right")]
    pub right: Vec<String>,

    /// LEFT PREDICATE RIGHT triples.
    #[arg(value_name = "JOIN_PART")]
    pub parts: Vec<String>,

    #[arg(long = "help", action = ArgAction::Help)]
    pub help: Option<bool>,
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct EvalArgs {
    /// Write CSV.
    #[arg(short = 'c', long = "csv", conflicts_with_all = ["parquet", "column"])]
    pub csv: bool,

    /// Write Parquet (requires -o).
    #[arg(short = 'p', long = "parquet", conflicts_with = "column")]
    pub parquet: bool,

    /// Write aligned columns.
    #[arg(short = 't', long = "column")]
    pub column: bool,

    /// Write to this file instead of stdout.
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Print the SQL and its parameters instead of running it.
    #[arg(short = 'q', long = "query")]
    pub query: bool,
}

impl EvalArgs {
    pub fn format(&self) -> Option<OutputFormat> {
        if self.csv {
            Some(OutputFormat::Csv)
        } else if self.parquet {
            Some(OutputFormat::Parquet)
        } else if self.column {
            Some(OutputFormat::Column)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Tool {
        let mut argv = vec!["sqlpipe"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap().tool
    }

    #[test]
    fn grep_positional_forms() {
        let Tool::Grep(args) = parse(&["grep", "status", "active"]) else { panic!() };
        let c = args.condition().unwrap();
        assert_eq!((c.field.as_str(), c.predicate, c.value.as_str()), ("status", None, "active"));

        let Tool::Grep(args) = parse(&["grep", "age", ">", "30"]) else { panic!() };
        let c = args.condition().unwrap();
        assert_eq!(c.predicate.as_deref(), Some(">"));
        assert_eq!(c.value, "30");

        let Tool::Grep(args) = parse(&["grep", "-f", "status", "-v", "active"]) else { panic!() };
        assert_eq!(args.condition().unwrap().field, "status");
    }

    #[test]
    fn grep_rejects_both_type_switches() {
        assert!(CliArgs::try_parse_from(["sqlpipe", "grep", "-i", "-t", "a", "1"]).is_err());
    }

    #[test]
    fn grep_needs_a_value() {
        let Tool::Grep(args) = parse(&["grep", "-f", "status"]) else { panic!() };
        assert!(matches!(args.condition(), Err(QueryAstError::Argument(_))));
    }

    #[test]
    fn join_short_h_is_how() {
        let Tool::Join(args) = parse(&["join", "-t", "users", "-h", "LEFT", "a.id", "=", "users.id"]) else {
            panic!()
        };
        assert_eq!(args.how, "LEFT");
        assert_eq!(args.parts, vec!["a.id", "=", "users.id"]);
    }

    #[test]
    fn head_defaults_to_ten() {
        let Tool::Head(args) = parse(&["head"]) else { panic!() };
        assert_eq!(args.limit(), 10);
        let Tool::Head(args) = parse(&["head", "3"]) else { panic!() };
        assert_eq!(args.limit(), 3);
        let Tool::Head(args) = parse(&["head", "-n", "5"]) else { panic!() };
        assert_eq!(args.limit(), 5);
    }

    #[test]
    fn eval_formats_are_exclusive() {
        assert!(CliArgs::try_parse_from(["sqlpipe", "eval", "-c", "-p"]).is_err());
        let Tool::Eval(args) = parse(&["eval", "-t"]) else { panic!() };
        assert_eq!(args.format(), Some(OutputFormat::Column));
        let Tool::Eval(args) = parse(&["eval"]) else { panic!() };
        assert_eq!(args.format(), None);
    }
}
