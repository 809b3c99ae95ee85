use std::fmt;

use clap::ValueEnum;
use nalgebra::DMatrix;

/// Unit of aggregation. Variants are grouped into blocks by gene symbol or
/// analysed one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Aggregation {
    #[value(name = "gene")]
    Gene,
    #[value(name = "variant")]
    Variant,
}

/// Correlation structure of effects across studies (R_study) or across
/// variants within a block (R_var).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum CorrelationModel {
    #[value(name = "independent")]
    Independent,
    #[value(name = "similar")]
    Similar,
}

impl CorrelationModel {
    pub fn matrix(&self, n: usize) -> DMatrix<f64> {
        match self {
            CorrelationModel::Independent => DMatrix::identity(n, n),
            CorrelationModel::Similar => DMatrix::from_element(n, n, 1.0),
        }
    }
}

/// Prior scale of the effect of each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum SigmaMType {
    #[value(name = "sigma_m_005")]
    SigmaM005,
    #[value(name = "sigma_m_1")]
    SigmaM1,
    #[value(name = "sigma_m_mpc_pli")]
    SigmaMMpcPli,
    #[value(name = "sigma_m_var")]
    SigmaMVar,
}

/// Which consequence categories enter an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum VariantFilter {
    #[value(name = "all")]
    All,
    #[value(name = "pav")]
    Pav,
    #[value(name = "pcv")]
    Pcv,
    #[value(name = "ptv")]
    Ptv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum PValueMethod {
    #[value(name = "davies")]
    Davies,
    #[value(name = "farebrother")]
    Farebrother,
    #[value(name = "imhof")]
    Imhof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenomeBuild {
    #[value(name = "hg19")]
    Hg19,
    #[value(name = "hg38")]
    Hg38,
}

impl GenomeBuild {
    /// Inclusive bounds of the HLA region on chromosome 6.
    pub fn hla_region(&self) -> (u64, u64) {
        match self {
            GenomeBuild::Hg19 => (25_477_797, 36_448_354),
            GenomeBuild::Hg38 => (25_477_569, 36_480_577),
        }
    }
}

macro_rules! display_as_value_name {
    ($($t:ty),*) => {
        $(
            impl fmt::Display for $t {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    let value = self
                        .to_possible_value()
                        .ok_or(fmt::Error)?;
                    write!(f, "{}", value.get_name())
                }
            }
        )*
    };
}

display_as_value_name!(
    Aggregation,
    CorrelationModel,
    SigmaMType,
    VariantFilter,
    PValueMethod,
    GenomeBuild
);

/// Remove duplicates and sort by canonical name.
pub fn unique_sorted<T: Ord + Copy>(values: &[T]) -> Vec<T> {
    let mut values = values.to_vec();
    values.sort();
    values.dedup();
    values
}

/// One point of the parameter grid. Every combination produces one set of
/// output columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSpec {
    pub aggregation: Aggregation,
    pub variant_filter: VariantFilter,
    pub sigma_m_type: SigmaMType,
    pub study_model: CorrelationModel,
    pub variant_model: CorrelationModel,
}

impl AnalysisSpec {
    /// Suffix shared by every column of this analysis, e.g.
    /// `study_similar_var_independent_sigma_m_var_ptv`.
    pub fn column_suffix(&self) -> String {
        format!(
            "study_{}_var_{}_{}_{}",
            self.study_model, self.variant_model, self.sigma_m_type, self.variant_filter
        )
    }

    pub fn bf_column(&self) -> String {
        format!("log_10_BF_{}", self.column_suffix())
    }

    pub fn posterior_column(&self, prior_odds: f64) -> String {
        format!(
            "posterior_prob_w_prior_odds_{}_{}",
            prior_odds,
            self.column_suffix()
        )
    }

    pub fn p_value_column(&self, method: PValueMethod) -> String {
        format!("p_value_{}_{}", method, self.column_suffix())
    }
}
