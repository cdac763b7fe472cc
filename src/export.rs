//! Result writers.
//!
//! The evaluator hands every non-empty batch to `Writer::write` and calls
//! `Writer::flush` exactly once at the end, so buffering writers print there.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use arrow::array::Array;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::query_ast::QueryAstError;

#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(String),
    #[error("{0} output requires a seekable file target; cannot write it to standard output")]
    Unseekable(&'static str),
    #[error("{0} output is not available in this build")]
    Unavailable(&'static str),
    #[error("write after flush")]
    Closed,
}

impl From<WriterError> for QueryAstError {
    fn from(e: WriterError) -> Self {
        match e {
            WriterError::Unseekable(_) | WriterError::Unavailable(_) | WriterError::Closed => {
                QueryAstError::Programming(e.to_string())
            }
            other => QueryAstError::Writer(other.to_string()),
        }
    }
}

pub trait Writer: Send {
    fn write(&mut self, batch: &RecordBatch) -> Result<(), WriterError>;
    fn flush(&mut self) -> Result<(), WriterError>;
}

/// Builds the writer once the result schema is known.
pub type WriterFactory = Box<dyn FnOnce(SchemaRef) -> Result<Box<dyn Writer>, WriterError> + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
    Column,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Parquet => write!(f, "parquet"),
            OutputFormat::Column => write!(f, "column"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "parquet" => Ok(OutputFormat::Parquet),
            "column" | "table" => Ok(OutputFormat::Column),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

fn open_target(target: &OutputTarget) -> Result<Box<dyn Write + Send>, WriterError> {
    Ok(match target {
        OutputTarget::Stdout => Box::new(BufWriter::new(io::stdout())),
        OutputTarget::File(path) => Box::new(BufWriter::new(File::create(path)?)),
    })
}

pub fn writer_factory(format: OutputFormat, target: OutputTarget) -> WriterFactory {
    Box::new(move |schema: SchemaRef| -> Result<Box<dyn Writer>, WriterError> {
        log::debug!("creating {} writer for {:?}", format, target);
        match (format, &target) {
            (OutputFormat::Csv, t) => Ok(Box::new(CsvWriter::new(schema, open_target(t)?)?)),
            (OutputFormat::Column, t) => Ok(Box::new(ColumnarWriter::new(schema, open_target(t)?))),
            (OutputFormat::Parquet, OutputTarget::Stdout) => Err(WriterError::Unseekable("parquet")),
            #[cfg(feature = "parquet_output")]
            (OutputFormat::Parquet, OutputTarget::File(path)) => {
                Ok(Box::new(ParquetWriter::new(schema, File::create(path)?)?))
            }
            #[cfg(not(feature = "parquet_output"))]
            (OutputFormat::Parquet, OutputTarget::File(_)) => Err(WriterError::Unavailable("parquet")),
        }
    })
}

fn cell_formatters<'a>(batch: &'a RecordBatch, options: &'a FormatOptions<'a>) -> Result<Vec<ArrayFormatter<'a>>, ArrowError> {
    batch
        .columns()
        .iter()
        .map(|c| ArrayFormatter::try_new(c.as_ref() as &dyn Array, options))
        .collect()
}

/// Streams rows as CSV with a header line.
pub struct CsvWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(schema: SchemaRef, out: W) -> Result<Self, WriterError> {
        let mut inner = csv::Writer::from_writer(out);
        inner.write_record(schema.fields().iter().map(|f| f.name().as_str()))?;
        Ok(Self { inner })
    }
}

impl<W: Write + Send> Writer for CsvWriter<W> {
    fn write(&mut self, batch: &RecordBatch) -> Result<(), WriterError> {
        let options = FormatOptions::default().with_null("");
        let formatters = cell_formatters(batch, &options)?;
        let mut record = Vec::with_capacity(formatters.len());
        for row in 0..batch.num_rows() {
            record.clear();
            for formatter in &formatters {
                record.push(formatter.value(row).to_string());
            }
            self.inner.write_record(&record)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(feature = "parquet_output")]
fn parquet_error(e: parquet::errors::ParquetError) -> WriterError {
    WriterError::Parquet(e.to_string())
}

/// Compressed Parquet file output. Closing the file happens on flush.
#[cfg(feature = "parquet_output")]
pub struct ParquetWriter<W: Write + Send> {
    inner: Option<parquet::arrow::ArrowWriter<W>>,
}

#[cfg(feature = "parquet_output")]
impl<W: Write + Send> ParquetWriter<W> {
    pub fn new(schema: SchemaRef, out: W) -> Result<Self, WriterError> {
        let props = parquet::file::properties::WriterProperties::builder()
            .set_compression(parquet::basic::Compression::SNAPPY)
            .build();
        let inner = parquet::arrow::ArrowWriter::try_new(out, schema, Some(props)).map_err(parquet_error)?;
        Ok(Self { inner: Some(inner) })
    }
}

#[cfg(feature = "parquet_output")]
impl<W: Write + Send> Writer for ParquetWriter<W> {
    fn write(&mut self, batch: &RecordBatch) -> Result<(), WriterError> {
        self.inner
            .as_mut()
            .ok_or(WriterError::Closed)?
            .write(batch)
            .map_err(parquet_error)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        let writer = self.inner.take().ok_or(WriterError::Closed)?;
        writer.close().map_err(parquet_error)?;
        Ok(())
    }
}

/// Aligned, space-separated columns. Buffers everything until flush because column
/// widths are only known once the last row is seen.
pub struct ColumnarWriter<W: Write> {
    out: W,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
}

fn display_width(s: &str) -> usize {
    s.graphemes(true).count()
}

impl<W: Write> ColumnarWriter<W> {
    pub fn new(schema: SchemaRef, out: W) -> Self {
        let header: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
        let widths = header.iter().map(|h| display_width(h)).collect();
        Self {
            out,
            rows: vec![header],
            widths,
        }
    }
}

impl<W: Write + Send> Writer for ColumnarWriter<W> {
    fn write(&mut self, batch: &RecordBatch) -> Result<(), WriterError> {
        let options = FormatOptions::default().with_null("NULL");
        let formatters = cell_formatters(batch, &options)?;
        for row in 0..batch.num_rows() {
            let mut rendered = Vec::with_capacity(formatters.len());
            for (col, formatter) in formatters.iter().enumerate() {
                let cell = formatter.value(row).to_string().replace(['\n', '\r'], " ");
                if let Some(width) = self.widths.get_mut(col) {
                    *width = (*width).max(display_width(&cell));
                }
                rendered.push(cell);
            }
            self.rows.push(rendered);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriterError> {
        for row in self.rows.drain(..) {
            let last = row.len().saturating_sub(1);
            let mut line = String::new();
            for (col, cell) in row.iter().enumerate() {
                if col > 0 {
                    line.push(' ');
                }
                line.push_str(cell);
                if col < last {
                    let width = self.widths.get(col).copied().unwrap_or(0);
                    line.push_str(&" ".repeat(width.saturating_sub(display_width(cell))));
                }
            }
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;
        Ok(())
    }
}
