use std::path::PathBuf;

use pyo3::{
    exceptions::{PyRuntimeError, PyValueError},
    prelude::*,
};

use crate::model::{
    Aggregation, CorrelationModel, GenomeBuild, PValueMethod, SigmaMType, VariantFilter,
};

#[pymodule]
fn _lowlevel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(mrp_impl, m)?)?;
    Ok(())
}

fn parse_all<T: clap::ValueEnum>(values: &[String]) -> PyResult<Vec<T>> {
    values
        .iter()
        .map(|v| T::from_str(v, true).map_err(PyRuntimeError::new_err))
        .collect()
}

fn check_all(values: Vec<f64>, check: fn(f64) -> Result<f64, String>) -> PyResult<Vec<f64>> {
    values
        .into_iter()
        .map(|v| check(v).map_err(PyValueError::new_err))
        .collect()
}

#[pyfunction]
#[allow(clippy::too_many_arguments)]
fn mrp_impl(
    file: String,
    metadata_path: String,
    build: String,
    chrom: Vec<String>,
    mean: f64,
    r_study: Vec<String>,
    r_var: Vec<String>,
    agg: Vec<String>,
    sigma_m_types: Vec<String>,
    variants: Vec<String>,
    maf_thresh: Vec<f64>,
    se_thresh: Vec<f64>,
    prior_odds: Vec<f64>,
    p_value: Vec<String>,
    exclude: Option<String>,
    filter_ld_indep: bool,
    out_folder: String,
    out_filename: Option<String>,
    num_threads: usize,
    compress: bool,
    quiet: bool,
) -> PyResult<Vec<String>> {
    let build = <GenomeBuild as clap::ValueEnum>::from_str(&build, true)
        .map_err(PyRuntimeError::new_err)?;
    let args = crate::InputArguments {
        file: PathBuf::from(file),
        metadata_path: PathBuf::from(metadata_path),
        build,
        chrom,
        mean,
        r_study: parse_all::<CorrelationModel>(&r_study)?,
        r_var: parse_all::<CorrelationModel>(&r_var)?,
        agg: parse_all::<Aggregation>(&agg)?,
        sigma_m_types: parse_all::<SigmaMType>(&sigma_m_types)?,
        variants: parse_all::<VariantFilter>(&variants)?,
        maf_thresh: check_all(maf_thresh, crate::check_unit_interval)?,
        se_thresh: check_all(se_thresh, crate::check_non_negative)?,
        prior_odds: check_all(prior_odds, crate::check_unit_interval)?,
        p_value: parse_all::<PValueMethod>(&p_value)?,
        exclude: exclude.map(PathBuf::from),
        filter_ld_indep,
        out_folder: PathBuf::from(out_folder),
        out_filename,
        err_corr_matrix: None,
        r_phen_matrix: None,
        num_threads,
        compress,
        quiet,
    };
    match crate::run_cli(args) {
        Ok(paths) => Ok(paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()),
        Err(e) => Err(PyRuntimeError::new_err(format!("{e}"))),
    }
}
