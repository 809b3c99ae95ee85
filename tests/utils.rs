use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use mrp::model::{
    Aggregation, CorrelationModel, GenomeBuild, PValueMethod, SigmaMType, VariantFilter,
};
use mrp::InputArguments;
use statrs::distribution::{ContinuousCDF, Normal};

pub const STUDIES: [&str; 2] = ["study_a", "study_b"];
pub const PHENOTYPES: [&str; 2] = ["pheno_1", "pheno_2"];
pub const N_GENES: usize = 10;
pub const VARIANTS_PER_GENE: usize = 3;
pub const SIGNAL_GENE: &str = "GENE_00";
pub const SE: f64 = 0.05;
/// Correlation of estimation errors between phenotypes of a study.
pub const ERROR_CORRELATION: f64 = 0.8;
/// Null gene with one extra variant whose consequence has no category.
pub const UNKNOWN_CONSEQUENCE_GENE: &str = "GENE_02";
/// Gene of missense variants with a high MPC score, on chromosome 4.
pub const PAV_GENE: &str = "PAV_GENE";
pub const PAV_MPC: f64 = 2.5;
/// Variants read from each summary statistics file on chromosome 1.
pub const CHROM_1_VARIANTS: usize = N_GENES * VARIANTS_PER_GENE + 1;
/// Variants read from each summary statistics file.
pub const READ_VARIANTS: usize = CHROM_1_VARIANTS + VARIANTS_PER_GENE + 300 + 40;

/// Deterministic pseudo-random numbers, so simulated inputs are identical
/// between runs.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn uniform(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 + 0.5) / (1u64 << 53) as f64
    }

    pub fn normal(&mut self) -> f64 {
        let u1 = self.uniform();
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

struct SimVariant {
    chrom: &'static str,
    pos: u64,
    gene: String,
    consequence: &'static str,
    maf: f64,
    mpc: Option<f64>,
    pli: bool,
    ld_indep: bool,
    /// Study-major, one per (study, phenotype).
    betas: Vec<f64>,
}

impl SimVariant {
    fn id(&self) -> String {
        format!("{}:{}:A:G", self.chrom, self.pos)
    }
}

/// Estimation errors, study-major, correlated across the phenotypes of a
/// study and independent between studies.
fn errors(rng: &mut Lcg) -> Vec<f64> {
    let mut errors = Vec::with_capacity(STUDIES.len() * PHENOTYPES.len());
    for _ in STUDIES {
        let shared = rng.normal();
        for _ in PHENOTYPES {
            let own = rng.normal();
            let z = ERROR_CORRELATION.sqrt() * shared + (1.0 - ERROR_CORRELATION).sqrt() * own;
            errors.push(SE * z);
        }
    }
    errors
}

fn rare_variant(
    rng: &mut Lcg,
    pos: u64,
    gene: &str,
    consequence: &'static str,
    effect: f64,
) -> SimVariant {
    SimVariant {
        chrom: "1",
        pos,
        gene: gene.to_string(),
        consequence,
        maf: 0.001,
        mpc: None,
        pli: false,
        ld_indep: false,
        betas: errors(rng).into_iter().map(|e| effect + e).collect(),
    }
}

fn simulate(rng: &mut Lcg) -> Vec<SimVariant> {
    let mut variants = Vec::new();

    // rare protein-truncating variants, one gene carrying a strong effect;
    // the first variant of each gene is LD-independent
    for g in 0..N_GENES {
        for i in 0..VARIANTS_PER_GENE {
            let effect = if g == 0 { 0.6 } else { 0.0 };
            let pos = 10_000 * (g as u64 + 1) + i as u64;
            let mut variant = rare_variant(rng, pos, &gene_name(g), "stop_gained", effect);
            variant.pli = g == 1;
            variant.ld_indep = i == 0;
            variants.push(variant);
        }
    }

    // a consequence without a category in one of the null genes
    variants.push(rare_variant(
        rng,
        30_000 + VARIANTS_PER_GENE as u64,
        UNKNOWN_CONSEQUENCE_GENE,
        "unclassified_variant",
        0.0,
    ));

    // damaging missense variants
    for i in 0..VARIANTS_PER_GENE {
        let mut variant = rare_variant(rng, 1_000 + i as u64, PAV_GENE, "missense_variant", 0.0);
        variant.chrom = "4";
        variant.mpc = Some(PAV_MPC);
        variants.push(variant);
    }

    // common null variants
    for j in 0..300 {
        variants.push(SimVariant {
            chrom: "2",
            pos: 1_000 + j,
            gene: format!("NULL_{}", j),
            consequence: "intergenic_variant",
            maf: 0.2,
            mpc: None,
            pli: false,
            ld_indep: true,
            betas: errors(rng),
        });
    }

    // common variants with effects shared by every phenotype
    for j in 0..40 {
        let shared = 0.3 * rng.normal();
        variants.push(SimVariant {
            chrom: "3",
            pos: 1_000 + j,
            gene: format!("COMMON_{}", j),
            consequence: "missense_variant",
            maf: 0.3,
            mpc: None,
            pli: false,
            ld_indep: true,
            betas: errors(rng).into_iter().map(|e| shared + e).collect(),
        });
    }

    // inside the hg19 HLA region
    variants.push(SimVariant {
        chrom: "6",
        pos: 30_000_000,
        gene: "HLA_GENE".to_string(),
        consequence: "stop_gained",
        maf: 0.001,
        mpc: None,
        pli: false,
        ld_indep: false,
        betas: vec![1.0; STUDIES.len() * PHENOTYPES.len()],
    });

    variants
}

fn gene_name(g: usize) -> String {
    format!("GENE_{:02}", g)
}

fn two_sided_p(z: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    2.0 * (1.0 - normal.cdf(z.abs()))
}

fn write_sumstats(variants: &[SimVariant], column: usize, path: &Path) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "#CHROM\tPOS\tREF\tALT\tBETA\tSE\tP\tERRCODE")?;
    for v in variants {
        let beta = v.betas[column];
        writeln!(
            writer,
            "{}\t{}\tA\tG\t{}\t{}\t{}\t.",
            v.chrom,
            v.pos,
            beta,
            SE,
            two_sided_p(beta / SE)
        )?;
    }
    // failed QC
    writeln!(writer, "1\t5\tA\tG\t0.1\t0.05\t0.04\tTEST_FAIL")?;
    writer.flush()
}

fn write_metadata(variants: &[SimVariant], path: &Path) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "V\tgene_symbol\tmost_severe_consequence\tmaf\tMPC\tpLI\tld_indep")?;
    for v in variants {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            v.id(),
            v.gene,
            v.consequence,
            v.maf,
            v.mpc.map_or("NA".to_string(), |mpc| mpc.to_string()),
            if v.pli { "True" } else { "False" },
            if v.ld_indep { "True" } else { "False" },
        )?;
    }
    writer.flush()
}

pub fn write_map_file(path: &Path, rows: &[(String, &str, &str, &str)]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "path\tstudy\tpheno\tR_phen")?;
    for (file, study, pheno, r_phen) in rows {
        writeln!(writer, "{}\t{}\t{}\t{}", file, study, pheno, r_phen)?;
    }
    writer.flush()
}

/// Simulate summary statistics for every (study, phenotype), the variant
/// metadata and the map file, and return arguments for a run over them.
pub fn setup_test(dir: &Path) -> InputArguments {
    std::fs::create_dir_all(dir.join("sumstats")).unwrap();

    let mut rng = Lcg::new(42);
    let variants = simulate(&mut rng);

    let mut rows = Vec::new();
    for (s, study) in STUDIES.iter().enumerate() {
        for (k, pheno) in PHENOTYPES.iter().enumerate() {
            let path = dir
                .join("sumstats")
                .join(format!("{}_{}.tsv", study, pheno));
            write_sumstats(&variants, s * PHENOTYPES.len() + k, &path).unwrap();
            rows.push((path.to_str().unwrap().to_string(), *study, *pheno, "TRUE"));
        }
    }
    write_map_file(&dir.join("map.tsv"), &rows).unwrap();
    write_metadata(&variants, &dir.join("metadata.tsv")).unwrap();

    InputArguments {
        file: dir.join("map.tsv"),
        metadata_path: dir.join("metadata.tsv"),
        build: GenomeBuild::Hg19,
        chrom: Vec::new(),
        mean: 0.0,
        r_study: vec![CorrelationModel::Similar],
        r_var: vec![CorrelationModel::Independent],
        agg: vec![Aggregation::Gene, Aggregation::Variant],
        sigma_m_types: vec![SigmaMType::SigmaMVar, SigmaMType::SigmaMMpcPli],
        variants: vec![VariantFilter::Ptv],
        maf_thresh: vec![0.01],
        se_thresh: vec![0.2],
        prior_odds: vec![0.0005],
        p_value: vec![PValueMethod::Davies, PValueMethod::Farebrother, PValueMethod::Imhof],
        exclude: None,
        filter_ld_indep: false,
        out_folder: dir.join("out"),
        out_filename: None,
        err_corr_matrix: None,
        r_phen_matrix: None,
        num_threads: 2,
        compress: false,
        quiet: true,
    }
}

pub fn output_file(dir: &Path, aggregation: &str, extension: &str) -> PathBuf {
    dir.join("out").join(format!(
        "study_a_study_b_pheno_1_pheno_2_{}_maf_0.01_se_0.2.{}",
        aggregation, extension
    ))
}

pub struct Results {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Results {
    pub fn column(&self, name: &str) -> usize {
        self.header
            .iter()
            .position(|c| c == name)
            .unwrap_or_else(|| panic!("Column {} missing from {:?}", name, self.header))
    }

    pub fn row(&self, key: &str) -> Option<&Vec<String>> {
        self.rows.iter().find(|r| r[0] == key)
    }

    pub fn value(&self, key: &str, column: &str) -> f64 {
        let row = self.row(key).unwrap();
        parse_cell(&row[self.column(column)])
    }
}

/// Numeric value of an output cell, NaN for `NA`.
pub fn parse_cell(cell: &str) -> f64 {
    if cell == "NA" {
        f64::NAN
    } else {
        cell.parse().unwrap()
    }
}

pub fn read_results_from<R: std::io::Read>(reader: R) -> Results {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(reader);
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(|x| x.to_string())
        .collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(|x| x.to_string()).collect())
        .collect();
    Results { header, rows }
}

pub fn read_results(path: &Path) -> Results {
    read_results_from(File::open(path).unwrap())
}
