//! Pipeline tool behaviour: read a plan, apply one change, pass it on or evaluate it.
//!
//! The mutation and dispatch steps are pure functions of their inputs; terminal state is
//! passed in as [`Terminals`] so they can run under test without a tty.

use std::io::{self, IsTerminal, Read};
use std::path::Path;

use log::{debug, warn};

use crate::cli::{EvalArgs, GrepArgs, JoinArgs, Tool};
use crate::config::Settings;
use crate::datasets::{dataset_reference, file_datasets};
use crate::export::{OutputFormat, OutputTarget, WriterFactory, writer_factory};
use crate::query_ast::executors::SqliteEngine;
use crate::query_ast::wire::{dump_query_plan, load_query_plan};
use crate::query_ast::{
    AliasGenerator, Condition, EvalSummary, Evaluator, ExitStatus, Fragment, JoinCondition, JoinFragment,
    LimitFragment, OrderFragment, OverallQueryPlan, QueryAstError, QueryParam, QueryPlan, SelectFragment,
    SqlFragment,
};
use crate::query_tools::format_query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminals {
    pub stdin: bool,
    pub stdout: bool,
}

impl Terminals {
    pub fn detect() -> Self {
        Self {
            stdin: io::stdin().is_terminal(),
            stdout: io::stdout().is_terminal(),
        }
    }
}

/// What to do with the plan once a tool has changed it.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Hand the plan to the next tool in the pipe.
    Emit(OverallQueryPlan),
    /// Print the compiled SQL and its parameters.
    PrintQuery(OverallQueryPlan),
    Evaluate {
        plan: OverallQueryPlan,
        format: OutputFormat,
        target: OutputTarget,
    },
}

/// Reads the incoming plan.
///
/// A terminal on stdin means there is no upstream tool. Tools that start a stage
/// tolerate unreadable input and start over; every other tool needs a non-empty plan.
pub fn load_input<R: Read>(tool: &Tool, reader: R, terminals: Terminals) -> Result<OverallQueryPlan, QueryAstError> {
    if tool.starts_stage() {
        if terminals.stdin {
            return Ok(OverallQueryPlan::new());
        }
        return Ok(load_query_plan(reader).unwrap_or_else(|e| {
            warn!("{}: ignoring unreadable input plan: {}", tool.name(), e);
            OverallQueryPlan::new()
        }));
    }

    if terminals.stdin {
        return Err(QueryAstError::Argument(format!(
            "{}: no query plan on standard input",
            tool.name()
        )));
    }
    let plan = load_query_plan(reader)?;
    if plan.is_empty() {
        return Err(QueryAstError::EmptyPlan);
    }
    Ok(plan)
}

/// Applies the tool's one change to the plan.
pub fn apply(tool: &Tool, plan: OverallQueryPlan) -> Result<OverallQueryPlan, QueryAstError> {
    match tool {
        Tool::Cat(args) => {
            let columns = if args.columns.is_empty() {
                vec!["*".to_string()]
            } else {
                args.columns.clone()
            };
            let datasets = args.datasets.iter().map(|d| dataset_reference(d)).collect();
            let select = SelectFragment::new(datasets, columns, args.alias.clone());
            Ok(plan.push(QueryPlan::new().with(Fragment::Select(select))))
        }
        Tool::Sql(args) => Ok(plan.push(QueryPlan::new().with(Fragment::RawSql(SqlFragment::new(&args.sql))))),
        Tool::Cut(args) => {
            let fields = args.all_fields()?;
            plan.map_last(|last| {
                let mut select = last.select.clone().ok_or(QueryAstError::MissingSelect)?;
                select.columns = fields;
                Ok(last.with(Fragment::Select(select)))
            })
        }
        Tool::Grep(args) => {
            let condition = grep_condition(args)?;
            plan.map_last(|last| Ok(last.and_where(condition)))
        }
        Tool::Head(args) => {
            let limit = LimitFragment::new(args.limit());
            plan.map_last(|last| Ok(last.with(Fragment::Limit(limit))))
        }
        Tool::Sort(args) => {
            let order = OrderFragment::new(args.all_fields()?, args.reverse);
            plan.map_last(|last| Ok(last.with(Fragment::Order(order))))
        }
        Tool::Join(args) => {
            let join = join_fragment(args);
            plan.map_last(|last| Ok(last.with(Fragment::Join(join))))
        }
        Tool::Eval(_) => Ok(plan),
    }
}

pub fn grep_condition(args: &GrepArgs) -> Result<Condition, QueryAstError> {
    let parts = args.condition()?;
    let (default_predicate, value) = if args.integer {
        let n = parts.value.trim().parse::<i64>().map_err(|e| {
            QueryAstError::Argument(format!("grep: couldn't convert '{}' to a number: {}", parts.value, e))
        })?;
        ("=", QueryParam::Numeric(n))
    } else if args.text {
        ("LIKE", QueryParam::Text(parts.value))
    } else {
        let value = QueryParam::Unknown(parts.value);
        (if value.is_null() { "IS" } else { "LIKE" }, value)
    };
    let predicate = parts.predicate.unwrap_or_else(|| default_predicate.to_string());
    Ok(Condition::new(parts.field, predicate, value))
}

pub fn join_fragment(args: &JoinArgs) -> JoinFragment {
    let mut conditions = Vec::new();

    let switches = args.left.len().min(args.predicate.len()).min(args.right.len());
    if args.left.len() != switches || args.predicate.len() != switches || args.right.len() != switches {
        warn!(
            "join: got {} left, {} predicate and {} right arguments; using the first {}",
            args.left.len(),
            args.predicate.len(),
            args.right.len(),
            switches
        );
    }
    for i in 0..switches {
        conditions.push(JoinCondition::new(&args.left[i], &args.predicate[i], &args.right[i]));
    }

    let triples = args.parts.chunks_exact(3);
    if !triples.remainder().is_empty() {
        warn!(
            "join: positional arguments come in groups of three (left, predicate, right); ignoring {} trailing",
            triples.remainder().len()
        );
    }
    for triple in triples {
        conditions.push(JoinCondition::new(&triple[0], &triple[1], &triple[2]));
    }

    JoinFragment::new(dataset_reference(&args.table), &args.how, conditions, args.alias.clone())
}

/// Decides between passing the plan on and evaluating it here.
pub fn dispatch(tool: &Tool, plan: OverallQueryPlan, terminals: Terminals, settings: &Settings) -> Action {
    match tool {
        Tool::Eval(args) if args.query => Action::PrintQuery(plan),
        Tool::Eval(args) => evaluate_action(plan, args, settings),
        _ if terminals.stdout => Action::Evaluate {
            plan,
            format: settings.default_format,
            target: OutputTarget::Stdout,
        },
        _ => Action::Emit(plan),
    }
}

fn evaluate_action(plan: OverallQueryPlan, args: &EvalArgs, settings: &Settings) -> Action {
    Action::Evaluate {
        plan,
        format: args.format().unwrap_or(settings.default_format),
        target: match &args.out {
            Some(path) => OutputTarget::File(path.clone()),
            None => OutputTarget::Stdout,
        },
    }
}

/// Runs one tool end to end against the process's stdin.
pub fn run_tool(tool: &Tool, terminals: Terminals, settings: &Settings) -> Result<(), QueryAstError> {
    let plan = load_input(tool, io::stdin().lock(), terminals)?;
    let plan = apply(tool, plan)?;
    match dispatch(tool, plan, terminals, settings) {
        Action::Emit(plan) => dump_query_plan(&plan, io::stdout().lock()),
        Action::PrintQuery(plan) => {
            let query = plan.generate(&mut AliasGenerator::new())?;
            println!("{}", format_query(&query));
            Ok(())
        }
        Action::Evaluate { plan, format, target } => {
            run_evaluation(&plan, writer_factory(format, target), settings).map(|_| ())
        }
    }
}

/// Opens the configured engine and evaluates `plan` on a single-threaded runtime.
pub fn run_evaluation(
    plan: &OverallQueryPlan,
    writer_factory: WriterFactory,
    settings: &Settings,
) -> Result<EvalSummary, QueryAstError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut engine = SqliteEngine::connect(&settings.database).await?;
        if let Some(init_sql) = &settings.init_sql {
            engine.run_script(init_sql).await?;
        }
        for dataset in file_datasets(plan) {
            let path = Path::new(&dataset);
            if path.is_file() {
                engine.load_file(&dataset, path).await?;
            } else {
                debug!("{} is not a file, leaving it to the engine", dataset);
            }
        }
        let summary = Evaluator::new(&mut engine, settings.batch_size)
            .try_evaluate(plan, writer_factory, &mut AliasGenerator::new())
            .await?;
        debug!("evaluation finished: {:?}", summary);
        Ok::<_, QueryAstError>(summary)
    })
}

pub fn exit_status_of(result: &Result<(), QueryAstError>) -> ExitStatus {
    match result {
        Ok(()) => ExitStatus::Success,
        Err(e) => e.exit_status(),
    }
}
