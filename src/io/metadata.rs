use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::annotation::{Category, VariantAnnotation};
use crate::io::error::MrpError;
use crate::io::sumstats::{MergedSumstats, VariantRecord};
use crate::io::{
    find_column, is_missing, open_input, parse_bool, parse_optional_f64, tsv_reader,
};

struct MappedColumns {
    variant_id: usize,
    gene_symbol: usize,
    consequence: usize,
    maf: usize,
    mpc: Option<usize>,
    pli: Option<usize>,
    ld_indep: Option<usize>,
}

fn map_column_names(header: &csv::StringRecord) -> Result<MappedColumns, MrpError> {
    Ok(MappedColumns {
        variant_id: find_column(header, "V")?,
        gene_symbol: find_column(header, "gene_symbol")?,
        consequence: find_column(header, "most_severe_consequence")?,
        maf: find_column(header, "maf")?,
        mpc: find_column(header, "MPC").ok(),
        pli: find_column(header, "pLI").ok(),
        ld_indep: find_column(header, "ld_indep").ok(),
    })
}

fn optional_bool(
    record: &csv::StringRecord,
    index: Option<usize>,
    column: &str,
) -> Result<bool, MrpError> {
    match index.and_then(|i| record.get(i)) {
        Some(value) if !is_missing(value) => parse_bool(value, column),
        _ => Ok(false),
    }
}

/// Inner-join the merged summary statistics with the variant metadata
/// table. Variants absent from the metadata are dropped.
pub fn annotate(merged: MergedSumstats, metadata_path: &Path) -> Result<Vec<VariantRecord>> {
    let mut reader = tsv_reader(metadata_path)
        .with_context(|| format!("Error opening metadata: {}", metadata_path.display()))?;
    let header = reader.headers()?.clone();
    let columns = map_column_names(&header)?;

    let MergedSumstats {
        n_columns,
        mut variants,
    } = merged;

    let mut records = Vec::new();
    let mut unknown_consequences = HashSet::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        let variant_id = record.get(columns.variant_id).unwrap_or("");
        let slots = match variants.remove(variant_id) {
            Some(slots) => slots,
            None => continue,
        };

        let consequence = record.get(columns.consequence).unwrap_or("NA").to_string();
        let category = Category::from_consequence(&consequence);
        if category.is_none() {
            unknown_consequences.insert(consequence.clone());
        }
        let mpc = match columns.mpc.and_then(|i| record.get(i)) {
            Some(value) => parse_optional_f64(value, "MPC")?,
            None => None,
        };

        let mut beta = Vec::with_capacity(n_columns);
        let mut se = Vec::with_capacity(n_columns);
        let mut p = Vec::with_capacity(n_columns);
        for slot in &slots {
            beta.push(slot.and_then(|a| a.beta));
            se.push(slot.map(|a| a.se));
            p.push(slot.and_then(|a| a.p));
        }

        records.push(VariantRecord {
            id: variant_id.to_string(),
            gene_symbol: record.get(columns.gene_symbol).unwrap_or("").to_string(),
            consequence,
            annotation: VariantAnnotation {
                category,
                mpc,
                pli: optional_bool(&record, columns.pli, "pLI")?,
            },
            maf: parse_optional_f64(record.get(columns.maf).unwrap_or(""), "maf")?,
            ld_indep: optional_bool(&record, columns.ld_indep, "ld_indep")?,
            beta,
            se,
            p,
        });
    }

    if !unknown_consequences.is_empty() {
        let mut unknown: Vec<String> = unknown_consequences.into_iter().collect();
        unknown.sort();
        warn!(
            "Consequences without a category (no annotation-based sigma): {}",
            unknown.join(", ")
        );
    }
    if !variants.is_empty() {
        info!("{} variants without metadata were dropped", variants.len());
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    info!("Annotated summary statistics: {} variants", records.len());

    Ok(records)
}

/// Read a list of variant ids, one per line.
pub fn read_exclusions(path: &Path) -> Result<HashSet<String>> {
    let input = open_input(path)
        .with_context(|| format!("Could not open exclusions file: {}", path.display()))?;
    let reader = BufReader::new(input);
    let mut excluded = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if !line.is_empty() {
            excluded.insert(line.to_string());
        }
    }
    Ok(excluded)
}
