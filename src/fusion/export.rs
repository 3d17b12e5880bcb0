use std::io::Write;

use anyhow::{anyhow, Context, Result};
use csv::{Terminator, WriterBuilder};

use crate::readings::format_timestamp;

use super::record::{Column, FusedRow, COLUMNS};

/// Writes fused rows in the SailNjord CSV layout.
///
/// Unobserved optional columns are left empty; numbers use six decimals.
pub struct CsvExporter<W: Write> {
    out: csv::Writer<W>,
    rows: u64,
}

impl<W: Write> CsvExporter<W> {
    /// Writes the header line immediately.
    pub fn new(out: W) -> Result<Self> {
        let mut out = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .from_writer(out);
        out.write_record(COLUMNS.iter().map(Column::header))
            .context("failed to write CSV header")?;
        Ok(Self { out, rows: 0 })
    }

    pub fn write_row(&mut self, row: &FusedRow) -> Result<()> {
        self.out
            .write_record(row_cells(row))
            .with_context(|| format!("failed to write CSV row {}", self.rows + 1))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes and hands back the writer.
    pub fn finish(self) -> Result<W> {
        self.out
            .into_inner()
            .map_err(|err| anyhow!("failed to flush CSV output: {}", err.error()))
    }
}

fn row_cells(row: &FusedRow) -> Vec<String> {
    COLUMNS
        .iter()
        .map(|column| match column {
            Column::IsoDateTimeUtc => format_timestamp(&row.timestamp),
            other => row
                .value(*other)
                .map(|value| format!("{value:.6}"))
                .unwrap_or_default(),
        })
        .collect()
}
