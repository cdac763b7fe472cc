//! Delimited text files used as datasets.
//!
//! `cat people.csv` and `join -t people.csv` name a file instead of a table. The tools
//! store such names as quoted identifiers; before evaluation each file is loaded into a
//! temporary table of the same name.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use crate::query_ast::{OverallQueryPlan, QueryAstError};

const EXTENSIONS: &[(&str, u8)] = &[("csv", b','), ("tsv", b'\t')];

/// Field delimiter for a dataset name that points at a delimited file.
pub fn file_delimiter(name: &str) -> Option<u8> {
    let extension = Path::new(name).extension()?.to_str()?;
    EXTENSIONS
        .iter()
        .find(|(ext, _)| extension.eq_ignore_ascii_case(ext))
        .map(|(_, delimiter)| *delimiter)
}

/// Table reference for a dataset argument: file names come back double-quoted.
pub fn dataset_reference(name: &str) -> String {
    if file_delimiter(name).is_some() && !name.starts_with('"') {
        quote_identifier(name)
    } else {
        name.to_string()
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn unquote_identifier(reference: &str) -> Option<String> {
    let inner = reference.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.replace("\"\"", "\""))
}

/// File datasets referenced anywhere in the chain, first mention first.
pub fn file_datasets(plan: &OverallQueryPlan) -> Vec<String> {
    let mut seen = HashSet::new();
    plan.plans
        .iter()
        .flat_map(|p| {
            let selected = p.select.iter().flat_map(|s| s.tablenames.iter());
            selected.chain(p.join.iter().map(|j| &j.table))
        })
        .filter_map(|reference| unquote_identifier(reference.trim()))
        .filter(|name| file_delimiter(name).is_some())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// SQLite storage type picked for a file column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileColumnType {
    Integer,
    Real,
    Text,
}

impl FileColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            FileColumnType::Integer => "INTEGER",
            FileColumnType::Real => "REAL",
            FileColumnType::Text => "TEXT",
        }
    }

    /// Narrowest type that still holds `cell`, starting from `self`.
    fn widen_for(self, cell: &str) -> Self {
        match self {
            FileColumnType::Integer if cell.parse::<i64>().is_ok() => FileColumnType::Integer,
            FileColumnType::Integer | FileColumnType::Real if cell.parse::<f64>().is_ok() => FileColumnType::Real,
            _ => FileColumnType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileColumn {
    pub name: String,
    pub column_type: FileColumnType,
}

pub fn open_reader(path: &Path) -> Result<csv::Reader<File>, QueryAstError> {
    let delimiter = file_delimiter(&path.to_string_lossy()).unwrap_or(b',');
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|e| file_error(path, e))
}

pub fn file_error(path: &Path, e: impl ToString) -> QueryAstError {
    QueryAstError::execution(&path.display().to_string(), e)
}

/// Reads the header and every row once to type each column. Empty cells are NULL
/// and do not constrain the type; a column with no values at all is TEXT.
pub fn infer_columns(path: &Path) -> Result<Vec<FileColumn>, QueryAstError> {
    let mut reader = open_reader(path)?;
    let names: Vec<String> = reader
        .headers()
        .map_err(|e| file_error(path, e))?
        .iter()
        .enumerate()
        .map(|(i, name)| match name.trim() {
            "" => format!("column{}", i + 1),
            trimmed => trimmed.to_string(),
        })
        .collect();
    if names.is_empty() {
        return Err(file_error(path, "no header row"));
    }

    let mut types: Vec<Option<FileColumnType>> = vec![None; names.len()];
    for record in reader.records() {
        let record = record.map_err(|e| file_error(path, e))?;
        for (slot, cell) in types.iter_mut().zip(record.iter()) {
            if cell.is_empty() {
                continue;
            }
            *slot = Some(slot.unwrap_or(FileColumnType::Integer).widen_for(cell));
        }
    }

    Ok(names
        .into_iter()
        .zip(types)
        .map(|(name, column_type)| FileColumn {
            name,
            column_type: column_type.unwrap_or(FileColumnType::Text),
        })
        .collect())
}
