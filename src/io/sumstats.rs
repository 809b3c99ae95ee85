use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::{info, warn};

use crate::annotation::VariantAnnotation;
use crate::io::error::MrpError;
use crate::io::mapfile::{MapEntry, MapFile};
use crate::io::{find_any_column, find_column, parse_optional_f64, tsv_reader};
use crate::model::GenomeBuild;

/// Filters applied while reading summary statistics.
#[derive(Debug, Clone)]
pub struct ReadFilter {
    pub build: GenomeBuild,
    /// Chromosomes to keep. Empty keeps everything.
    pub chromosomes: Vec<String>,
}

struct MappedColumns {
    chrom: usize,
    pos: usize,
    reference: usize,
    alternate: usize,
    effect: usize,
    effect_is_odds_ratio: bool,
    se: usize,
    p: usize,
    errcode: Option<usize>,
}

/// Effect size, standard error and p-value of one variant in one file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Association {
    pub beta: Option<f64>,
    pub se: f64,
    pub p: Option<f64>,
}

/// Summary statistics of a single (study, phenotype).
#[derive(Debug, Clone)]
pub struct SumstatTable {
    pub study: String,
    pub pheno: String,
    pub variants: Vec<(String, Association)>,
}

fn map_column_names(header: &csv::StringRecord) -> Result<MappedColumns, MrpError> {
    let effect = find_any_column(header, &["BETA", "OR"])?;
    let effect_is_odds_ratio = header.get(effect) == Some("OR");
    Ok(MappedColumns {
        chrom: find_any_column(header, &["#CHROM", "CHROM"])?,
        pos: find_column(header, "POS")?,
        reference: find_column(header, "REF")?,
        alternate: find_column(header, "ALT")?,
        effect,
        effect_is_odds_ratio,
        se: find_any_column(header, &["LOG(OR)_SE", "SE"])?,
        p: find_column(header, "P")?,
        errcode: find_column(header, "ERRCODE").ok(),
    })
}

fn in_hla_region(chrom: &str, pos: u64, build: GenomeBuild) -> bool {
    let (start, end) = build.hla_region();
    chrom == "6" && pos >= start && pos <= end
}

/// Read one summary statistics file, dropping variants that failed QC
/// (ERRCODE other than `.`), have no standard error, lie outside the
/// chromosome filter, or fall within the HLA region.
pub fn read_summary_stats(
    path: &Path,
    study: &str,
    pheno: &str,
    filter: &ReadFilter,
) -> Result<SumstatTable> {
    let mut reader = tsv_reader(path)?;
    let header = reader.headers()?.clone();
    let columns = map_column_names(&header)?;

    let mut variants = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        let field = |i: usize| record.get(i).unwrap_or("");

        if let Some(errcode) = columns.errcode {
            if field(errcode) != "." {
                continue;
            }
        }

        let chrom = field(columns.chrom);
        if !filter.chromosomes.is_empty() && !filter.chromosomes.iter().any(|c| c == chrom) {
            continue;
        }

        let se = match parse_optional_f64(field(columns.se), "SE")? {
            Some(se) => se,
            None => continue,
        };

        let pos_field = field(columns.pos);
        let pos = pos_field
            .parse::<u64>()
            .map_err(|_| MrpError::InvalidValue {
                column: "POS".to_string(),
                value: pos_field.to_string(),
            })?;
        if in_hla_region(chrom, pos, filter.build) {
            continue;
        }

        let raw_effect = parse_optional_f64(field(columns.effect), "BETA")?;
        let beta = if columns.effect_is_odds_ratio {
            raw_effect.map(f64::ln)
        } else {
            raw_effect
        };
        let p = parse_optional_f64(field(columns.p), "P")?;

        let variant_id = format!(
            "{}:{}:{}:{}",
            chrom,
            pos,
            field(columns.reference),
            field(columns.alternate)
        );
        variants.push((variant_id, Association { beta, se, p }));
    }

    Ok(SumstatTable {
        study: study.to_string(),
        pheno: pheno.to_string(),
        variants,
    })
}

/// Annotations and per-(study, phenotype) statistics of one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub id: String,
    pub gene_symbol: String,
    pub consequence: String,
    pub annotation: VariantAnnotation,
    pub maf: Option<f64>,
    pub ld_indep: bool,
    /// Study-major, length S * K.
    pub beta: Vec<Option<f64>>,
    pub se: Vec<Option<f64>>,
    pub p: Vec<Option<f64>>,
}

impl VariantRecord {
    /// Smallest available standard error across all (study, phenotype).
    pub fn min_se(&self) -> Option<f64> {
        self.se
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc, x| Some(acc.map_or(x, |a: f64| a.min(x))))
    }
}

/// All summary statistics outer-joined on the variant id. Each value holds
/// the study-major (beta, se, p) slots.
pub struct MergedSumstats {
    pub n_columns: usize,
    pub variants: BTreeMap<String, Vec<Option<Association>>>,
}

impl MergedSumstats {
    pub fn new(n_columns: usize) -> Self {
        MergedSumstats {
            n_columns,
            variants: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, column: usize, table: SumstatTable) {
        let n_columns = self.n_columns;
        for (variant_id, association) in table.variants {
            let slots = self
                .variants
                .entry(variant_id)
                .or_insert_with(|| vec![None; n_columns]);
            slots[column] = Some(association);
        }
    }
}

fn sumstat_reader(
    entries: &[MapEntry],
    filter: &ReadFilter,
    output: &Sender<Result<SumstatTable>>,
) -> Result<()> {
    for entry in entries {
        let table = read_summary_stats(&entry.path, &entry.study, &entry.pheno, filter)
            .with_context(|| {
                format!(
                    "Error reading summary statistics from file: {}",
                    entry.path.display()
                )
            });
        output.send(table)?;
    }
    Ok(())
}

/// Read every file listed in the map file with `num_threads` readers and
/// merge them into one table keyed by variant id.
pub fn read_all_summary_stats(
    map_file: &MapFile,
    filter: &ReadFilter,
    num_threads: usize,
) -> Result<MergedSumstats> {
    for study in &map_file.studies {
        for pheno in &map_file.phenotypes {
            if map_file.entry(study, pheno).is_none() {
                warn!(
                    "A summary statistic file cannot be found for study: {}; phenotype: {}",
                    study, pheno
                );
            }
        }
    }

    let n_columns = map_file.n_studies() * map_file.n_phenotypes();
    let num_threads = num_threads.max(1);
    let chunk_size = map_file.entries.len().div_ceil(num_threads).max(1);
    let (sender, receiver) = crossbeam_channel::unbounded::<Result<SumstatTable>>();

    let mut merged = MergedSumstats::new(n_columns);
    std::thread::scope(|scope| -> Result<()> {
        let mut readers = Vec::new();
        for chunk in map_file.entries.chunks(chunk_size) {
            let sender = sender.clone();
            readers.push(scope.spawn(move || sumstat_reader(chunk, filter, &sender)));
        }
        drop(sender);

        for table in receiver.iter() {
            let table = table?;
            let column = map_file
                .column_index(&table.study, &table.pheno)
                .context("Summary statistics for an unknown study or phenotype")?;
            info!(
                "{} {} {} variants",
                table.study,
                table.pheno,
                table.variants.len()
            );
            merged.insert(column, table);
        }

        for reader in readers {
            reader
                .join()
                .map_err(|_| anyhow::anyhow!("Summary statistics reader panicked"))??;
        }
        Ok(())
    })?;

    info!("Merged summary statistics: {} variants", merged.variants.len());
    Ok(merged)
}
