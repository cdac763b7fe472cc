//! JSON interchange format passed between pipeline stages.

use std::io::{Read, Write};

use super::errors::QueryAstError;
use super::logical::OverallQueryPlan;

pub fn encode(plan: &OverallQueryPlan) -> Result<String, QueryAstError> {
    Ok(serde_json::to_string(plan)?)
}

pub fn decode(doc: &str) -> Result<OverallQueryPlan, QueryAstError> {
    Ok(serde_json::from_str(doc)?)
}

pub fn load_query_plan<R: Read>(reader: R) -> Result<OverallQueryPlan, QueryAstError> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn dump_query_plan<W: Write>(plan: &OverallQueryPlan, mut writer: W) -> Result<(), QueryAstError> {
    serde_json::to_writer(&mut writer, plan)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
