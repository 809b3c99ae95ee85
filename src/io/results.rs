use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A cell of the results table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Count(usize),
    Value(f64),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Count(n) => n.to_string(),
            Cell::Value(x) if x.is_nan() => "NA".to_string(),
            Cell::Value(x) => x.to_string(),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Cell::Count(n) => *n as f64,
            Cell::Value(x) => *x,
        }
    }
}

/// Results keyed by block (gene or variant). Adding columns from several
/// analyses behaves like an outer join on the block key: rows missing from
/// an analysis get `NA` in its columns.
#[derive(Debug, Clone)]
pub struct ResultsTable {
    key_column: String,
    columns: Vec<String>,
    rows: BTreeMap<String, HashMap<String, Cell>>,
}

impl ResultsTable {
    pub fn new(key_column: &str) -> Self {
        ResultsTable {
            key_column: key_column.to_string(),
            columns: Vec::new(),
            rows: BTreeMap::new(),
        }
    }

    pub fn add_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn set(&mut self, key: &str, column: &str, cell: Cell) {
        self.add_column(column);
        self.rows
            .entry(key.to_string())
            .or_default()
            .insert(column.to_string(), cell);
    }

    pub fn get(&self, key: &str, column: &str) -> Option<Cell> {
        self.rows.get(key)?.get(column).copied()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys ordered by the first log10 BF column, largest first, missing
    /// values last.
    fn sorted_keys(&self) -> Vec<&String> {
        let mut keys: Vec<&String> = self.rows.keys().collect();
        let sort_column = match self.columns.iter().find(|c| c.contains("log_10_BF")) {
            Some(column) => column,
            None => return keys,
        };
        let value = |key: &String| {
            self.rows[key]
                .get(sort_column)
                .map(|c| c.as_f64())
                .filter(|x| !x.is_nan())
        };
        keys.sort_by(|a, b| match (value(a), value(b)) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        keys
    }

    fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);

        let mut header = vec![self.key_column.clone()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for key in self.sorted_keys() {
            let row = &self.rows[key];
            let mut record = vec![key.clone()];
            record.extend(self.columns.iter().map(|c| {
                row.get(c)
                    .map(|cell| cell.render())
                    .unwrap_or_else(|| "NA".to_string())
            }));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the table as TSV, zstd-compressed when `compress` is set.
    pub fn write(&self, filename: &Path, compress: bool) -> Result<()> {
        let file = File::create(filename)
            .with_context(|| format!("Unable to create {}", filename.display()))?;
        if compress {
            let mut encoder = zstd::Encoder::new(file, 0)?;
            self.write_to(&mut encoder)?;
            encoder.finish()?;
        } else {
            self.write_to(file)?;
        }
        Ok(())
    }
}

/// Output path for one (SE threshold, MAF threshold, aggregation) table.
pub fn output_path(
    out_folder: &Path,
    studies: &[String],
    phenotypes: &[String],
    out_filename: Option<&str>,
    aggregation: &str,
    maf_thresh: f64,
    se_thresh: f64,
    chromosomes: &[String],
    compress: bool,
) -> PathBuf {
    let label = match out_filename {
        Some(prefix) => prefix.to_string(),
        None => phenotypes.join("_"),
    };
    let mut name = format!(
        "{}_{}_{}_maf_{}_se_{}",
        studies.join("_"),
        label,
        aggregation,
        maf_thresh,
        se_thresh
    );
    if !chromosomes.is_empty() {
        name.push_str(&format!("_chrs_{}", chromosomes.join("_")));
    }
    name.push_str(if compress { ".tsv.zst" } else { ".tsv" });
    out_folder.join(name)
}
