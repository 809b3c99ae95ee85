use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;

use crate::io::error::MrpError;
use crate::io::{is_missing, parse_bool, tsv_reader};

#[derive(Debug, Deserialize)]
struct MapFileLine {
    path: String,
    study: String,
    pheno: String,
    #[serde(rename = "R_phen")]
    r_phen: String,
}

/// One summary statistics file and the (study, phenotype) it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub path: PathBuf,
    pub study: String,
    pub pheno: String,
    /// Whether this file contributes to the estimate of R_phen.
    pub use_for_r_phen: bool,
}

#[derive(Debug, Clone)]
pub struct MapFile {
    pub entries: Vec<MapEntry>,
    /// Sorted unique studies (S of them).
    pub studies: Vec<String>,
    /// Sorted unique phenotypes (K of them).
    pub phenotypes: Vec<String>,
}

impl MapFile {
    pub fn n_studies(&self) -> usize {
        self.studies.len()
    }

    pub fn n_phenotypes(&self) -> usize {
        self.phenotypes.len()
    }

    /// Position of a (study, pheno) pair in study-major order.
    pub fn column_index(&self, study: &str, pheno: &str) -> Option<usize> {
        let s = self.studies.iter().position(|x| x == study)?;
        let k = self.phenotypes.iter().position(|x| x == pheno)?;
        Some(s * self.n_phenotypes() + k)
    }

    pub fn entry(&self, study: &str, pheno: &str) -> Option<&MapEntry> {
        self.entries
            .iter()
            .find(|e| e.study == study && e.pheno == pheno)
    }
}

fn invalid(reason: impl Into<String>) -> MrpError {
    MrpError::InvalidMapFile(reason.into())
}

/// Read and validate the map file listing summary statistics files.
pub fn read_map_file(path: &Path) -> Result<MapFile> {
    let mut reader =
        tsv_reader(path).with_context(|| format!("Error opening map file: {}", path.display()))?;

    let mut lines = Vec::new();
    for result in reader.deserialize() {
        let line: MapFileLine = result.map_err(MrpError::from)?;
        lines.push(line);
    }

    let entries = check_map_file(lines)?;

    let mut studies: Vec<String> = entries.iter().map(|e| e.study.clone()).collect();
    studies.sort();
    studies.dedup();
    let mut phenotypes: Vec<String> = entries.iter().map(|e| e.pheno.clone()).collect();
    phenotypes.sort();
    phenotypes.dedup();

    info!("Map file passes initial checks");
    info!("Studies: {}", studies.join(", "));
    info!("Phenotypes: {}", phenotypes.join(", "));

    Ok(MapFile {
        entries,
        studies,
        phenotypes,
    })
}

fn check_map_file(lines: Vec<MapFileLine>) -> Result<Vec<MapEntry>, MrpError> {
    let mut paths = HashSet::new();
    let mut pairs = HashSet::new();
    let mut entries = Vec::with_capacity(lines.len());

    for line in lines {
        if [&line.path, &line.study, &line.pheno, &line.r_phen]
            .iter()
            .any(|x| is_missing(x))
        {
            return Err(invalid("missing values in map file"));
        }
        if !paths.insert(line.path.clone()) {
            return Err(invalid(format!("duplicate path entry {}", line.path)));
        }
        let path = PathBuf::from(&line.path);
        if !path.exists() {
            return Err(invalid(format!("file {} does not exist", line.path)));
        }
        if !pairs.insert((line.study.clone(), line.pheno.clone())) {
            return Err(invalid(format!(
                "multiple summary statistic files for study {}, phenotype {}",
                line.study, line.pheno
            )));
        }
        let use_for_r_phen = parse_bool(&line.r_phen, "R_phen").map_err(|_| {
            invalid(format!(
                "R_phen value '{}' is not a case-insensitive TRUE/FALSE",
                line.r_phen
            ))
        })?;

        entries.push(MapEntry {
            path,
            study: line.study,
            pheno: line.pheno,
            use_for_r_phen,
        });
    }

    if entries.is_empty() {
        return Err(invalid("no summary statistic files listed"));
    }

    Ok(entries)
}
