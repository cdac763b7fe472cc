/// Process exit status shared by every pipeline tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    QueryGenerationError = 1,
    ExecutionError = 2,
    ProgrammingError = 3,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueryAstError {
    #[error("no SELECT clause or raw SQL present in query plan")]
    MissingSelect,
    #[error("SELECT names no table to read from")]
    NoSourceTable,
    #[error("error generating query from plan {index}: {source}")]
    PlanIndex {
        index: usize,
        #[source]
        source: Box<QueryAstError>,
    },
    #[error("column '{column}' not found in schema")]
    SchemaLookup { column: String },
    #[error("could not convert parameter '{literal}' to {target} for column '{column}': {reason}")]
    TypeCoercion {
        column: String,
        literal: String,
        target: &'static str,
        reason: String,
    },
    #[error("unable to infer parameter type for column '{column}' of type {declared}")]
    UnsupportedColumnType { column: String, declared: String },
    #[error("error executing statement: {reason}\n  query: {query}")]
    Execution { query: String, reason: String },
    #[error("programming error: {0}")]
    Programming(String),
    #[error("empty query plan")]
    EmptyPlan,
    #[error("unable to parse query plan: {0}")]
    Wire(#[from] serde_json::Error),
    #[error("error writing results: {0}")]
    Writer(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Argument(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryAstError {
    pub fn execution(query: &str, reason: impl ToString) -> Self {
        QueryAstError::Execution {
            query: query.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            QueryAstError::MissingSelect
            | QueryAstError::NoSourceTable
            | QueryAstError::PlanIndex { .. }
            | QueryAstError::EmptyPlan
            | QueryAstError::Wire(_)
            | QueryAstError::Config(_)
            | QueryAstError::Argument(_) => ExitStatus::QueryGenerationError,
            QueryAstError::SchemaLookup { .. }
            | QueryAstError::TypeCoercion { .. }
            | QueryAstError::UnsupportedColumnType { .. }
            | QueryAstError::Execution { .. }
            | QueryAstError::Writer(_)
            | QueryAstError::Io(_) => ExitStatus::ExecutionError,
            QueryAstError::Programming(_) => ExitStatus::ProgrammingError,
        }
    }
}
