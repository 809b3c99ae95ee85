//! Empirical estimates of the correlation of estimation errors (err_corr)
//! and of the genetic correlation between phenotypes (R_phen).

use log::{info, warn};
use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::annotation::is_null_consequence;
use crate::io::mapfile::MapFile;
use crate::io::sumstats::VariantRecord;

const MIN_MAF: f64 = 0.01;
/// Both p-values at or above this make a variant "null" for err_corr.
const NULL_P: f64 = 1e-2;
/// Either p-value at or below this makes a variant "significant" for R_phen.
const SIGNIFICANT_P: f64 = 1e-5;
/// Correlations with a test p-value above this are not used.
const CORRELATION_P: f64 = 0.01;
const MIN_ABS_CORRELATION: f64 = 0.01;
const MAX_R_PHEN: f64 = 0.9;

/// Pearson correlation with the two-sided p-value of the t-test on n - 2
/// degrees of freedom. None with fewer than three pairs or no variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 3 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);

    let df = (n - 2) as f64;
    let p = if 1.0 - r.abs() <= f64::EPSILON {
        0.0
    } else {
        let t = r * (df / (1.0 - r * r)).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df).ok()?;
        (2.0 * dist.cdf(-t.abs())).min(1.0)
    };
    Some((r, p))
}

fn is_common_and_independent(variant: &VariantRecord) -> bool {
    variant.ld_indep && variant.maf.map_or(false, |maf| maf >= MIN_MAF)
}

/// Columns among `columns` with at least one effect in `variants`.
fn observed_columns(variants: &[&VariantRecord], columns: &[usize]) -> Vec<usize> {
    columns
        .iter()
        .copied()
        .filter(|&c| variants.iter().any(|v| v.beta[c].is_some()))
        .collect()
}

/// Variants with a beta and a p-value in every one of `columns`.
fn complete_rows<'a>(variants: &[&'a VariantRecord], columns: &[usize]) -> Vec<&'a VariantRecord> {
    variants
        .iter()
        .copied()
        .filter(|v| columns.iter().all(|&c| v.beta[c].is_some() && v.p[c].is_some()))
        .collect()
}

/// Betas of columns `a` and `b` over the variants whose p-values satisfy
/// `keep(p_a, p_b)`.
fn paired_betas<F>(variants: &[&VariantRecord], a: usize, b: usize, keep: F) -> (Vec<f64>, Vec<f64>)
where
    F: Fn(f64, f64) -> bool,
{
    variants
        .iter()
        .filter_map(|v| match (v.beta[a], v.beta[b], v.p[a], v.p[b]) {
            (Some(beta_a), Some(beta_b), Some(p_a), Some(p_b)) if keep(p_a, p_b) => {
                Some((beta_a, beta_b))
            }
            _ => None,
        })
        .unzip()
}

/// SK x SK correlation of estimation errors, estimated from common,
/// LD-independent variants with null consequences.
pub fn build_err_corr(variants: &[VariantRecord], map_file: &MapFile) -> DMatrix<f64> {
    let n_studies = map_file.n_studies();
    let n_phenotypes = map_file.n_phenotypes();
    let n = n_studies * n_phenotypes;
    if n == 1 {
        return DMatrix::from_element(1, 1, 1.0);
    }

    let candidates: Vec<&VariantRecord> = variants
        .iter()
        .filter(|v| is_common_and_independent(v) && is_null_consequence(&v.consequence))
        .collect();
    let all_columns: Vec<usize> = (0..n).collect();
    let columns = observed_columns(&candidates, &all_columns);
    let rows = complete_rows(&candidates, &columns);
    if rows.is_empty() {
        warn!("Correlation of errors is noisy, assuming independent effects");
        return DMatrix::identity(n, n);
    }
    info!("Estimating correlation of errors from {} variants", rows.len());

    let mut err_corr = DMatrix::identity(n, n);
    for a in 0..n {
        for b in (a + 1)..n {
            let (x, y) = paired_betas(&rows, a, b, |p_a, p_b| p_a >= NULL_P && p_b >= NULL_P);
            let value = match pearson(&x, &y) {
                Some((r, p)) if p <= CORRELATION_P => r,
                _ => 0.0,
            };
            err_corr[(a, b)] = value;
            err_corr[(b, a)] = value;
        }
    }
    zero_small_entries(&mut err_corr);
    err_corr
}

/// K x K genetic correlation between phenotypes, estimated from
/// significant, common, LD-independent variants in the files flagged for it.
pub fn build_r_phen(variants: &[VariantRecord], map_file: &MapFile) -> DMatrix<f64> {
    let n_studies = map_file.n_studies();
    let n_phenotypes = map_file.n_phenotypes();
    if n_phenotypes == 1 {
        return DMatrix::from_element(1, 1, 1.0);
    }
    let n = n_studies * n_phenotypes;

    let flagged: Vec<usize> = map_file
        .entries
        .iter()
        .filter(|e| e.use_for_r_phen)
        .filter_map(|e| map_file.column_index(&e.study, &e.pheno))
        .collect();

    let candidates: Vec<&VariantRecord> = variants
        .iter()
        .filter(|v| is_common_and_independent(v))
        .collect();
    let columns = observed_columns(&candidates, &flagged);
    let rows = complete_rows(&candidates, &columns);
    if columns.is_empty() || rows.is_empty() {
        warn!("No files usable for R_phen generation, assuming independent effects");
        return DMatrix::identity(n_phenotypes, n_phenotypes);
    }
    info!(
        "Estimating R_phen from {} variants over {} files",
        rows.len(),
        columns.len()
    );

    // upper triangle of the SK x SK correlation between (study, pheno) pairs
    let mut phen_corr = DMatrix::from_element(n, n, f64::NAN);
    for (i, &a) in columns.iter().enumerate() {
        for &b in &columns[i + 1..] {
            let (lo, hi) = (a.min(b), a.max(b));
            let (x, y) = paired_betas(&rows, lo, hi, |p_a, p_b| {
                p_a <= SIGNIFICANT_P || p_b <= SIGNIFICANT_P
            });
            if let Some((r, p)) = pearson(&x, &y) {
                if p <= CORRELATION_P {
                    phen_corr[(lo, hi)] = r;
                }
            }
        }
    }

    let mut r_phen = DMatrix::identity(n_phenotypes, n_phenotypes);
    for k1 in 0..n_phenotypes {
        for k2 in (k1 + 1)..n_phenotypes {
            let indices: Vec<usize> = (0..n_studies)
                .flat_map(|s| [s * n_phenotypes + k1, s * n_phenotypes + k2])
                .collect();
            let mut values: Vec<f64> = indices
                .iter()
                .flat_map(|&a| indices.iter().map(move |&b| (a, b)))
                .map(|(a, b)| phen_corr[(a, b)])
                .filter(|x| !x.is_nan())
                .collect();
            let value = median(&mut values).unwrap_or(0.0);
            r_phen[(k1, k2)] = value;
            r_phen[(k2, k1)] = value;
        }
    }

    zero_small_entries(&mut r_phen);
    cap_off_diagonal(&mut r_phen);
    r_phen
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(0.5 * (values[mid - 1] + values[mid]))
    } else {
        Some(values[mid])
    }
}

fn zero_small_entries(x: &mut DMatrix<f64>) {
    x.iter_mut()
        .filter(|v| v.abs() < MIN_ABS_CORRELATION)
        .for_each(|v| *v = 0.0);
}

/// Pull off-diagonal cells towards zero until none exceeds `MAX_R_PHEN`.
fn cap_off_diagonal(x: &mut DMatrix<f64>) {
    let max_off_diagonal = |x: &DMatrix<f64>| {
        let mut max = f64::NEG_INFINITY;
        for i in 0..x.nrows() {
            for j in 0..x.ncols() {
                if i != j {
                    max = max.max(x[(i, j)]);
                }
            }
        }
        max
    };
    while max_off_diagonal(x) > MAX_R_PHEN {
        for i in 0..x.nrows() {
            for j in 0..x.ncols() {
                if i != j {
                    x[(i, j)] *= MAX_R_PHEN;
                }
            }
        }
    }
}

