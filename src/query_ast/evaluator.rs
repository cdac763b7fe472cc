//! Compiles an `OverallQueryPlan`, resolves its parameters and streams the result to a writer.

use std::fmt;

use arrow::record_batch::RecordBatch;
use log::debug;

use super::alias::AliasGenerator;
use super::errors::{ExitStatus, QueryAstError};
use super::executor::{QueryEngine, arrow_schema, schema_map};
use super::inference::{bind_params, schema_probe_sql};
use super::logical::OverallQueryPlan;
use crate::export::{Writer, WriterFactory};

/// Progress of one evaluation. Any failure lands in `Failed` with its exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    Init,
    SchemaProbed,
    Prepared,
    Streaming,
    Flushed,
    Done,
    Failed(ExitStatus),
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalState::Init => write!(f, "init"),
            EvalState::SchemaProbed => write!(f, "schema-probed"),
            EvalState::Prepared => write!(f, "prepared"),
            EvalState::Streaming => write!(f, "streaming"),
            EvalState::Flushed => write!(f, "flushed"),
            EvalState::Done => write!(f, "done"),
            EvalState::Failed(status) => write!(f, "failed({:?})", status),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalSummary {
    pub batches: usize,
    pub rows: usize,
}

pub struct Evaluator<'e, E: QueryEngine + ?Sized> {
    engine: &'e mut E,
    batch_size: usize,
    state: EvalState,
}

impl<'e, E: QueryEngine + ?Sized> Evaluator<'e, E> {
    pub fn new(engine: &'e mut E, batch_size: usize) -> Self {
        Self {
            engine,
            batch_size: batch_size.max(1),
            state: EvalState::Init,
        }
    }

    pub fn state(&self) -> EvalState {
        self.state
    }

    fn transition(&mut self, next: EvalState) {
        debug!("evaluator: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Runs the plan and reports any failure on stderr.
    pub async fn evaluate(
        &mut self,
        plan: &OverallQueryPlan,
        writer_factory: WriterFactory,
        aliases: &mut AliasGenerator,
    ) -> ExitStatus {
        match self.try_evaluate(plan, writer_factory, aliases).await {
            Ok(_) => ExitStatus::Success,
            Err(e) => {
                eprintln!("{}", e);
                e.exit_status()
            }
        }
    }

    pub async fn try_evaluate(
        &mut self,
        plan: &OverallQueryPlan,
        writer_factory: WriterFactory,
        aliases: &mut AliasGenerator,
    ) -> Result<EvalSummary, QueryAstError> {
        let result = self.run(plan, writer_factory, aliases).await;
        if let Err(e) = &result {
            self.transition(EvalState::Failed(e.exit_status()));
        }
        result
    }

    async fn run(
        &mut self,
        plan: &OverallQueryPlan,
        writer_factory: WriterFactory,
        aliases: &mut AliasGenerator,
    ) -> Result<EvalSummary, QueryAstError> {
        let query = plan.generate(aliases)?;
        debug!("evaluator: sql = {}", query.text);
        debug!("evaluator: {} parameter(s)", query.params.len());

        let probe_sql = schema_probe_sql(plan)?;
        let probe_columns = self.engine.describe_sources(&probe_sql).await?;
        let params = bind_params(&query.params, &schema_map(&probe_columns))?;
        debug!("evaluator: bound {:?}", params);
        self.transition(EvalState::SchemaProbed);

        let columns = self.engine.describe(&query.text).await?;
        let schema = arrow_schema(&columns);
        let mut writer: Box<dyn Writer> = writer_factory(schema.clone())?;
        self.transition(EvalState::Prepared);

        self.transition(EvalState::Streaming);
        let mut summary = EvalSummary::default();
        self.engine
            .execute(
                &query.text,
                &params,
                schema,
                self.batch_size,
                &mut |batch: RecordBatch| -> Result<(), QueryAstError> {
                    if batch.num_rows() == 0 {
                        return Ok(());
                    }
                    summary.batches += 1;
                    summary.rows += batch.num_rows();
                    writer.write(&batch)?;
                    Ok(())
                },
            )
            .await?;

        writer.flush()?;
        self.transition(EvalState::Flushed);
        debug!(
            "evaluator: wrote {} row(s) in {} batch(es) via {}",
            summary.rows,
            summary.batches,
            self.engine.name()
        );
        self.transition(EvalState::Done);
        Ok(summary)
    }
}
