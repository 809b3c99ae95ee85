use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::annotation::passes_filter;
use crate::io;
use crate::io::mapfile::MapFile;
use crate::io::results::{Cell, ResultsTable};
use crate::io::sumstats::{ReadFilter, VariantRecord};
use crate::model::{
    Aggregation, AnalysisSpec, CorrelationModel, GenomeBuild, PValueMethod, SigmaMType,
    VariantFilter,
};
use crate::stats::bayes::{bayes_factor, block_params, BayesFactor, SharedMatrices};
use crate::stats::correlation::{build_err_corr, build_r_phen};

pub struct RuntimeConfig {
    pub num_threads: usize,
    pub compress: bool,
}

/// Input files of a run.
#[derive(Debug, Clone)]
pub struct InputPaths {
    pub map_file: PathBuf,
    pub metadata: PathBuf,
    pub exclude: Option<PathBuf>,
    /// Overrides for the estimated correlation matrices.
    pub err_corr_matrix: Option<PathBuf>,
    pub r_phen_matrix: Option<PathBuf>,
}

/// The parameter grid and the filters of a run. Every list is deduplicated
/// and sorted before use.
#[derive(Debug, Clone)]
pub struct AnalysisGrid {
    pub build: GenomeBuild,
    pub chromosomes: Vec<String>,
    pub mean: f64,
    pub study_models: Vec<CorrelationModel>,
    pub variant_models: Vec<CorrelationModel>,
    pub aggregations: Vec<Aggregation>,
    pub sigma_m_types: Vec<SigmaMType>,
    pub variant_filters: Vec<VariantFilter>,
    pub maf_thresholds: Vec<f64>,
    pub se_thresholds: Vec<f64>,
    pub prior_odds: Vec<f64>,
    pub p_value_methods: Vec<PValueMethod>,
    pub filter_ld_indep: bool,
}

#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub out_folder: PathBuf,
    pub out_filename: Option<String>,
}

pub fn sorted_floats(values: &[f64]) -> Vec<f64> {
    let mut values = values.to_vec();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
    values
}

/// Labels of the study-major (study, phenotype) columns.
pub fn study_pheno_labels(map_file: &MapFile) -> Vec<String> {
    map_file
        .studies
        .iter()
        .flat_map(|s| map_file.phenotypes.iter().map(move |p| format!("{}_{}", s, p)))
        .collect()
}

/// Read, merge and annotate every input, then apply the exclusion list and
/// the LD-independence filter.
pub fn load_variants(
    paths: &InputPaths,
    grid: &AnalysisGrid,
    runtime_config: &RuntimeConfig,
) -> Result<(MapFile, Vec<VariantRecord>)> {
    let map_file = io::mapfile::read_map_file(&paths.map_file)
        .with_context(|| format!("Error reading map file: {}", paths.map_file.display()))?;
    info!(
        "Found {} studies {:?} and {} phenotypes {:?}",
        map_file.n_studies(),
        map_file.studies,
        map_file.n_phenotypes(),
        map_file.phenotypes
    );

    let filter = ReadFilter {
        build: grid.build,
        chromosomes: grid.chromosomes.clone(),
    };
    let merged =
        io::sumstats::read_all_summary_stats(&map_file, &filter, runtime_config.num_threads)?;
    info!("Merged summary statistics of {} variants", merged.variants.len());

    let mut variants = io::metadata::annotate(merged, &paths.metadata)?;
    info!("{} variants with metadata", variants.len());

    if let Some(exclude) = &paths.exclude {
        let excluded = io::metadata::read_exclusions(exclude)
            .with_context(|| format!("Error reading exclusion list: {}", exclude.display()))?;
        variants.retain(|v| !excluded.contains(&v.id));
        info!("{} variants after exclusions", variants.len());
    }
    if grid.filter_ld_indep {
        variants.retain(|v| v.ld_indep);
        info!("{} LD-independent variants", variants.len());
    }
    Ok((map_file, variants))
}

/// Variants whose smallest standard error is at most `se_thresh`.
pub fn se_filter(variants: &[VariantRecord], se_thresh: f64) -> Vec<VariantRecord> {
    variants
        .iter()
        .filter(|v| v.min_se().is_some_and(|se| se <= se_thresh))
        .cloned()
        .collect()
}

/// Group variants into blocks keyed by gene symbol or variant id.
pub fn group_blocks<'a>(
    variants: &[&'a VariantRecord],
    aggregation: Aggregation,
) -> BTreeMap<String, Vec<&'a VariantRecord>> {
    let mut blocks: BTreeMap<String, Vec<&VariantRecord>> = BTreeMap::new();
    for &variant in variants {
        let key = match aggregation {
            Aggregation::Gene => &variant.gene_symbol,
            Aggregation::Variant => &variant.id,
        };
        blocks.entry(key.clone()).or_default().push(variant);
    }
    blocks
}

/// Number of effects with both a beta and an SE in each block.
pub fn count_effects(
    blocks: &BTreeMap<String, Vec<&VariantRecord>>,
) -> BTreeMap<String, usize> {
    blocks
        .iter()
        .map(|(key, variants)| {
            let n = variants
                .iter()
                .map(|v| {
                    v.beta
                        .iter()
                        .zip(&v.se)
                        .filter(|(beta, se)| beta.is_some() && se.is_some())
                        .count()
                })
                .sum();
            (key.clone(), n)
        })
        .collect()
}

/// Bayes factor of one block with the counts reported next to it.
#[derive(Debug, Clone)]
pub struct BlockResult {
    pub key: String,
    pub num_mpc: usize,
    pub num_pli: usize,
    pub bf: BayesFactor,
}

/// Run one analysis over every block on the pool.
pub fn analyse_blocks(
    pool: &rayon::ThreadPool,
    blocks: &BTreeMap<String, Vec<&VariantRecord>>,
    spec: &AnalysisSpec,
    shared: &SharedMatrices,
    grid: &AnalysisGrid,
) -> Vec<BlockResult> {
    let blocks: Vec<(&String, &Vec<&VariantRecord>)> = blocks.iter().collect();
    pool.install(|| {
        blocks
            .par_iter()
            .map(|(key, variants)| {
                let sigmas: Vec<f64> = variants
                    .iter()
                    .filter_map(|v| v.annotation.sigma_m(spec.sigma_m_type))
                    .collect();
                let params = block_params(variants, &sigmas, spec.variant_model, shared, grid.mean);
                let bf = bayes_factor(&params, key, &grid.prior_odds, &grid.p_value_methods);
                BlockResult {
                    key: key.to_string(),
                    num_mpc: variants.iter().filter(|v| v.annotation.is_damaging_pav()).count(),
                    num_pli: variants.iter().filter(|v| v.annotation.is_pli_ptv()).count(),
                    bf,
                }
            })
            .collect()
    })
}

/// Add the columns of one analysis to the output table. `effect_counts`
/// covers every block of the variant filter, including variants without a
/// prior scale under this analysis.
pub fn add_results(
    table: &mut ResultsTable,
    spec: &AnalysisSpec,
    grid: &AnalysisGrid,
    effect_counts: &BTreeMap<String, usize>,
    results: &[BlockResult],
) {
    let filter = spec.variant_filter;
    let count_columns = spec.aggregation == Aggregation::Gene;
    let mpc_pli_columns = count_columns && spec.sigma_m_type == SigmaMType::SigmaMMpcPli;

    let mut columns = Vec::new();
    if count_columns {
        columns.push(format!("num_variants_{}", filter));
    }
    if mpc_pli_columns {
        columns.push(format!("num_variants_mpc_{}", filter));
        columns.push(format!("num_variants_pli_{}", filter));
    }
    let bf_column = spec.bf_column();
    columns.push(bf_column.clone());
    let posterior_columns: Vec<String> = grid
        .prior_odds
        .iter()
        .map(|&odds| spec.posterior_column(odds))
        .collect();
    let p_value_columns: Vec<String> = grid
        .p_value_methods
        .iter()
        .map(|&method| spec.p_value_column(method))
        .collect();
    columns.extend(posterior_columns.iter().cloned());
    columns.extend(p_value_columns.iter().cloned());
    for column in &columns {
        table.add_column(column);
    }

    if count_columns {
        for (key, &count) in effect_counts {
            table.set(key, &columns[0], Cell::Count(count));
        }
    }
    for result in results {
        if mpc_pli_columns {
            table.set(&result.key, &columns[1], Cell::Count(result.num_mpc));
            table.set(&result.key, &columns[2], Cell::Count(result.num_pli));
        }
        table.set(&result.key, &bf_column, Cell::Value(result.bf.log10_bf));
        for (column, value) in posterior_columns.iter().zip(&result.bf.posterior_probs) {
            table.set(&result.key, column, Cell::Value(*value));
        }
        for (column, value) in p_value_columns.iter().zip(&result.bf.p_values) {
            table.set(&result.key, column, Cell::Value(*value));
        }
    }
}

/// Estimate err_corr and R_phen from the variants, or read them from the
/// override files.
fn correlation_matrices(
    paths: &InputPaths,
    map_file: &MapFile,
    variants: &[VariantRecord],
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let err_corr = match &paths.err_corr_matrix {
        Some(path) => read_matrix_override(path, &study_pheno_labels(map_file))?,
        None => build_err_corr(variants, map_file),
    };
    let r_phen = match &paths.r_phen_matrix {
        Some(path) => read_matrix_override(path, &map_file.phenotypes)?,
        None => build_r_phen(variants, map_file),
    };
    Ok((err_corr, r_phen))
}

fn read_matrix_override(path: &Path, labels: &[String]) -> Result<DMatrix<f64>> {
    let filename = path.to_string_lossy();
    let matrix = io::matrix::read_labeled_matrix(&filename)
        .with_context(|| format!("Error reading matrix: {}", filename))?;
    info!("Read {:?} matrix from {}", matrix.matrix.shape(), filename);
    matrix.aligned_to(labels)
}

fn prefix(map_file: &MapFile, output: &OutputSpec) -> String {
    let label = match &output.out_filename {
        Some(name) => name.clone(),
        None => map_file.phenotypes.join("_"),
    };
    format!("{}_{}", map_file.studies.join("_"), label)
}

fn create_out_folder(folder: &Path) -> Result<()> {
    if !folder.exists() {
        std::fs::create_dir_all(folder)
            .with_context(|| format!("Unable to create folder {}", folder.display()))?;
        info!("Folder {} created", folder.display());
    }
    Ok(())
}

/// Analyses of one aggregation unit, in output column order.
fn analysis_specs(
    grid: &AnalysisGrid,
    aggregation: Aggregation,
    n_studies: usize,
) -> Vec<AnalysisSpec> {
    let study_models = if n_studies == 1 {
        vec![CorrelationModel::Similar]
    } else {
        grid.study_models.clone()
    };
    let variant_models = if aggregation == Aggregation::Variant {
        vec![CorrelationModel::Independent]
    } else {
        grid.variant_models.clone()
    };

    let mut specs = Vec::new();
    for &variant_filter in &grid.variant_filters {
        for &sigma_m_type in &grid.sigma_m_types {
            for &study_model in &study_models {
                for &variant_model in &variant_models {
                    specs.push(AnalysisSpec {
                        aggregation,
                        variant_filter,
                        sigma_m_type,
                        study_model,
                        variant_model,
                    });
                }
            }
        }
    }
    specs
}

/// Run every analysis of the grid and write one results table per
/// (SE threshold, MAF threshold, aggregation unit).
pub fn run(
    paths: &InputPaths,
    grid: &AnalysisGrid,
    output: &OutputSpec,
    runtime_config: RuntimeConfig,
) -> Result<Vec<PathBuf>> {
    let (map_file, variants) = load_variants(paths, grid, &runtime_config)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(runtime_config.num_threads)
        .build()?;
    create_out_folder(&output.out_folder)?;

    if map_file.n_studies() == 1 && grid.study_models.len() > 1 {
        info!("Since we are not meta-analyzing, R_study is just [1]");
    }
    if grid.aggregations.contains(&Aggregation::Variant) && grid.variant_models.len() > 1 {
        info!("Since we are not aggregating over variants, R_var is just [1]");
    }

    let mut written = Vec::new();
    let mut warned_missing_sigma = false;
    for &se_thresh in &grid.se_thresholds {
        let se_variants = se_filter(&variants, se_thresh);
        info!(
            "{} variants pass SE threshold {}",
            se_variants.len(),
            se_thresh
        );

        let (err_corr, r_phen) = correlation_matrices(paths, &map_file, &se_variants)?;
        info!("Correlation of errors, SE threshold = {}:\n{}", se_thresh, err_corr);
        info!("R_phen:\n{}", r_phen);
        let stem = format!("{}_se_{}", prefix(&map_file, output), se_thresh);
        io::matrix::write_labeled_matrix(
            &err_corr,
            &study_pheno_labels(&map_file),
            &output.out_folder.join(format!("{}_err_corr.tsv", stem)),
        )?;
        io::matrix::write_labeled_matrix(
            &r_phen,
            &map_file.phenotypes,
            &output.out_folder.join(format!("{}_R_phen.tsv", stem)),
        )?;

        for &maf_thresh in &grid.maf_thresholds {
            info!(
                "Running MRP across parameters for MAF threshold {} and SE threshold {}",
                maf_thresh, se_thresh
            );
            let maf_variants: Vec<&VariantRecord> = se_variants
                .iter()
                .filter(|v| v.maf.is_some_and(|maf| (0.0..=maf_thresh).contains(&maf)))
                .collect();

            for &aggregation in &grid.aggregations {
                let key_column = aggregation.to_string();
                let mut table = ResultsTable::new(&key_column);

                for spec in analysis_specs(grid, aggregation, map_file.n_studies()) {
                    let selected: Vec<&VariantRecord> = maf_variants
                        .iter()
                        .copied()
                        .filter(|v| passes_filter(spec.variant_filter, v.annotation.category))
                        .collect();
                    let (usable, missing_sigma): (Vec<&VariantRecord>, Vec<&VariantRecord>) =
                        selected
                            .iter()
                            .copied()
                            .partition(|v| v.annotation.sigma_m(spec.sigma_m_type).is_some());
                    if !missing_sigma.is_empty() && !warned_missing_sigma {
                        warn!(
                            "{} variants have no prior scale under {} and are skipped",
                            missing_sigma.len(),
                            spec.sigma_m_type
                        );
                        warned_missing_sigma = true;
                    }

                    let effect_counts = if aggregation == Aggregation::Gene {
                        count_effects(&group_blocks(&selected, aggregation))
                    } else {
                        BTreeMap::new()
                    };
                    let blocks = group_blocks(&usable, aggregation);
                    let shared = SharedMatrices::new(
                        spec.study_model,
                        map_file.n_studies(),
                        &r_phen,
                        &err_corr,
                    );
                    info!(
                        "Analysis {} over {} {}s, {} prior odds, p-values {:?}, mean {}",
                        spec.column_suffix(),
                        blocks.len(),
                        aggregation,
                        grid.prior_odds.len(),
                        grid.p_value_methods,
                        grid.mean
                    );
                    let results = analyse_blocks(&pool, &blocks, &spec, &shared, grid);
                    let converged = results.iter().filter(|r| r.bf.converged).count();
                    info!(
                        "{}/{} {}s' matrices had well-behaved eigenvalues",
                        converged,
                        results.len(),
                        aggregation
                    );
                    add_results(&mut table, &spec, grid, &effect_counts, &results);
                }

                let path = io::results::output_path(
                    &output.out_folder,
                    &map_file.studies,
                    &map_file.phenotypes,
                    output.out_filename.as_deref(),
                    &key_column,
                    maf_thresh,
                    se_thresh,
                    &grid.chromosomes,
                    runtime_config.compress,
                );
                table
                    .write(&path, runtime_config.compress)
                    .with_context(|| format!("Error writing results to {}", path.display()))?;
                info!("Results for {} {}s written to {}", table.len(), key_column, path.display());
                written.push(path);
            }
        }
    }

    Ok(written)
}
