use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::Parser;
use log::{info, warn};

pub mod annotation;
pub mod io;
pub mod model;
pub mod stats;
pub mod util;

#[cfg(feature = "python")]
mod python;

use model::{
    unique_sorted, Aggregation, CorrelationModel, GenomeBuild, PValueMethod, SigmaMType,
    VariantFilter,
};

const CHROMOSOMES: [&str; 24] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y",
];

fn parse_float(arg: &str) -> Result<f64, String> {
    arg.parse()
        .map_err(|_| format!("{} is not a valid floating point number", arg))
}

/// Accept values in (0, 1], as required of MAF thresholds and prior odds.
pub fn check_unit_interval(value: f64) -> Result<f64, String> {
    if value.is_nan() || value <= 0.0 || value > 1.0 {
        return Err(format!("{} must be > 0 and <= 1", value));
    }
    Ok(value)
}

/// Accept values >= 0, as required of SE thresholds.
pub fn check_non_negative(value: f64) -> Result<f64, String> {
    if value.is_nan() || value < 0.0 {
        return Err(format!("{} must be >= 0", value));
    }
    Ok(value)
}

fn unit_interval(arg: &str) -> Result<f64, String> {
    check_unit_interval(parse_float(arg)?)
}

fn non_negative(arg: &str) -> Result<f64, String> {
    check_non_negative(parse_float(arg)?)
}

/// Rare-variant association across multiple studies and phenotypes using
/// Bayes factors computed from summary statistics.
#[derive(Parser, Debug)]
#[command(author, version)]
pub struct InputArguments {
    /// Tab-separated map file with columns path, study, pheno and R_phen
    #[arg(short, long)]
    pub file: PathBuf,

    /// Tab-separated variant metadata with columns V, gene_symbol,
    /// most_severe_consequence, maf and optionally MPC, pLI, ld_indep
    #[arg(short, long, alias = "metadata_path")]
    pub metadata_path: PathBuf,

    /// Genome build, used to exclude the HLA region
    #[arg(short, long, value_enum)]
    pub build: GenomeBuild,

    /// Chromosomes to keep (default: all)
    #[arg(long, num_args(1..), value_parser = PossibleValuesParser::new(CHROMOSOMES))]
    pub chrom: Vec<String>,

    /// Prior mean of genetic effects
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub mean: f64,

    /// Model(s) of effect correlation across studies
    #[arg(
        long,
        alias = "R_study",
        num_args(1..),
        value_enum,
        default_values_t = [CorrelationModel::Similar],
    )]
    pub r_study: Vec<CorrelationModel>,

    /// Model(s) of effect correlation across variants of a gene
    #[arg(
        long,
        alias = "R_var",
        num_args(1..),
        value_enum,
        default_values_t = [CorrelationModel::Independent],
    )]
    pub r_var: Vec<CorrelationModel>,

    /// Unit(s) of aggregation
    #[arg(long, alias = "M", num_args(1..), value_enum, default_values_t = [Aggregation::Gene])]
    pub agg: Vec<Aggregation>,

    /// Prior scale(s) of variant effects
    #[arg(
        long,
        alias = "sigma_m_types",
        num_args(1..),
        value_enum,
        default_values_t = [SigmaMType::SigmaMMpcPli],
    )]
    pub sigma_m_types: Vec<SigmaMType>,

    /// Variant set(s) to consider
    #[arg(long, num_args(1..), value_enum, default_values_t = [VariantFilter::Ptv])]
    pub variants: Vec<VariantFilter>,

    /// Maximum MAF threshold(s), each > 0 and <= 1
    #[arg(
        long,
        alias = "maf_thresh",
        num_args(1..),
        value_parser = unit_interval,
        default_values_t = [0.01],
    )]
    pub maf_thresh: Vec<f64>,

    /// Maximum SE threshold(s), each >= 0. The default suits binary traits;
    /// quantitative traits usually need a higher threshold
    #[arg(
        long,
        alias = "se_thresh",
        num_args(1..),
        value_parser = non_negative,
        default_values_t = [0.2],
    )]
    pub se_thresh: Vec<f64>,

    /// Prior odds used for posterior probabilities, each > 0 and <= 1
    #[arg(
        long,
        alias = "prior_odds",
        num_args(1..),
        value_parser = unit_interval,
        default_values_t = [0.0005],
    )]
    pub prior_odds: Vec<f64>,

    /// Method(s) converting Bayes factors to p-values (default: none).
    /// Where Davies cannot reach the required accuracy its p-value is 1
    #[arg(long, alias = "p_value", num_args(1..), value_enum)]
    pub p_value: Vec<PValueMethod>,

    /// File listing variant ids to exclude, one per line
    #[arg(long)]
    pub exclude: Option<PathBuf>,

    /// Keep only LD-independent variants
    #[arg(long, alias = "filter_ld_indep")]
    pub filter_ld_indep: bool,

    /// Folder for the outputs, created if missing (default: current folder)
    #[arg(short, long, alias = "out_folder", default_value = ".")]
    pub out_folder: PathBuf,

    /// Output file prefix (default: underscore-delimited phenotypes)
    #[arg(long, alias = "out_filename")]
    pub out_filename: Option<String>,

    /// Labeled matrix to use as the correlation of errors instead of the
    /// estimate
    #[arg(long)]
    pub err_corr_matrix: Option<PathBuf>,

    /// Labeled matrix to use as R_phen instead of the estimate
    #[arg(long)]
    pub r_phen_matrix: Option<PathBuf>,

    /// Number of threads to use
    #[arg(short, long, default_value_t = 1)]
    pub num_threads: usize,

    /// Whether to compress the output using zstd
    #[arg(long, default_value_t = false)]
    pub compress: bool,

    /// Suppress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn run_cli(args: InputArguments) -> Result<Vec<PathBuf>> {
    info!("Received arguments: {:#?}", &args);

    info!("Starting MRP");
    let start = std::time::Instant::now();

    if !args.p_value.is_empty() {
        warn!(
            "P-value generation can slow the analysis down considerably; \
             consider posterior probabilities instead"
        );
    }

    let paths = util::InputPaths {
        map_file: args.file,
        metadata: args.metadata_path,
        exclude: args.exclude,
        err_corr_matrix: args.err_corr_matrix,
        r_phen_matrix: args.r_phen_matrix,
    };

    let mut chromosomes = args.chrom;
    chromosomes.sort();
    chromosomes.dedup();

    let grid = util::AnalysisGrid {
        build: args.build,
        chromosomes,
        mean: args.mean,
        study_models: unique_sorted(&args.r_study),
        variant_models: unique_sorted(&args.r_var),
        aggregations: unique_sorted(&args.agg),
        sigma_m_types: unique_sorted(&args.sigma_m_types),
        variant_filters: unique_sorted(&args.variants),
        maf_thresholds: util::sorted_floats(&args.maf_thresh),
        se_thresholds: util::sorted_floats(&args.se_thresh),
        prior_odds: util::sorted_floats(&args.prior_odds),
        p_value_methods: unique_sorted(&args.p_value),
        filter_ld_indep: args.filter_ld_indep,
    };

    let output = util::OutputSpec {
        out_folder: args.out_folder,
        out_filename: args.out_filename,
    };

    let runtime_config = util::RuntimeConfig {
        num_threads: args.num_threads.max(1),
        compress: args.compress,
    };

    let written = util::run(&paths, &grid, &output, runtime_config)?;

    let duration = Duration::new(start.elapsed().as_secs(), 0);
    info!(
        "Finished MRP in {}",
        humantime::format_duration(duration).to_string()
    );

    Ok(written)
}
