use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::io::sumstats::VariantRecord;
use crate::model::{CorrelationModel, PValueMethod};
use crate::stats::linalg::{
    is_pos_def_and_full_rank, log_abs_det, safe_inv, select_square, symmetrize,
};
use crate::stats::qf;

/// Eigenvalues of the quadratic form at or below this are dropped before
/// computing p-values.
const MIN_QF_WEIGHT: f64 = 0.01;

/// Correlation structures shared by every block of an analysis.
#[derive(Debug, Clone)]
pub struct SharedMatrices {
    /// S x S
    pub r_study: DMatrix<f64>,
    /// K x K
    pub r_phen: DMatrix<f64>,
    /// SK x SK, correlation of estimation errors.
    pub err_corr: DMatrix<f64>,
}

impl SharedMatrices {
    pub fn new(
        study_model: CorrelationModel,
        n_studies: usize,
        r_phen: &DMatrix<f64>,
        err_corr: &DMatrix<f64>,
    ) -> Self {
        let (r_study, _) = is_pos_def_and_full_rank(&study_model.matrix(n_studies), 0.99);
        let (r_phen, _) = is_pos_def_and_full_rank(r_phen, 0.99);
        SharedMatrices {
            r_study,
            r_phen,
            err_corr: err_corr.clone(),
        }
    }

    pub fn n_studies(&self) -> usize {
        self.r_study.nrows()
    }

    pub fn n_phenotypes(&self) -> usize {
        self.r_phen.nrows()
    }
}

/// Prior and likelihood quantities of one block after removing missing
/// effects.
#[derive(Debug, Clone)]
pub struct BlockParams {
    /// Prior covariance of effects, R_study (x) R_phen (x) S_var.
    pub u: DMatrix<f64>,
    pub beta: DVector<f64>,
    /// Covariance of the estimation errors.
    pub v_beta: DMatrix<f64>,
    /// Prior mean of effects.
    pub mu: DVector<f64>,
    /// Whether U could be made positive definite.
    pub converged: bool,
}

/// Build U, beta, V and mu for a block of M variants with prior scales
/// `sigmas`. Effects are laid out study-major, then phenotype, then variant.
pub fn block_params(
    variants: &[&VariantRecord],
    sigmas: &[f64],
    variant_model: CorrelationModel,
    shared: &SharedMatrices,
    mean: f64,
) -> BlockParams {
    let m = variants.len();
    let n_columns = shared.n_studies() * shared.n_phenotypes();

    let (r_var, _) = is_pos_def_and_full_rank(&variant_model.matrix(m), 0.99);
    let diag_sigma = DMatrix::from_diagonal(&DVector::from_column_slice(sigmas));
    let s_var = &diag_sigma * r_var * &diag_sigma;

    let u_full = shared.r_study.kronecker(&shared.r_phen).kronecker(&s_var);
    let omega_full = shared.err_corr.kronecker(&DMatrix::<f64>::identity(m, m));

    let mut keep = Vec::new();
    let mut beta = Vec::new();
    let mut se = Vec::new();
    for column in 0..n_columns {
        for (i, variant) in variants.iter().enumerate() {
            if let (Some(b), Some(s)) = (variant.beta[column], variant.se[column]) {
                keep.push(column * m + i);
                beta.push(b);
                se.push(s);
            }
        }
    }

    let u = select_square(&u_full, &keep);
    let omega = select_square(&omega_full, &keep);

    let (u, converged) = is_pos_def_and_full_rank(&u, 0.8);
    let diag_se = DMatrix::from_diagonal(&DVector::from_column_slice(&se));
    let (v_beta, _) = is_pos_def_and_full_rank(&(&diag_se * omega * &diag_se), 0.99);
    let mu = DVector::from_element(beta.len(), mean);

    BlockParams {
        u,
        beta: DVector::from_vec(beta),
        v_beta,
        mu,
        converged,
    }
}

/// log10 Bayes factor with the derived posterior probabilities and
/// p-values of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BayesFactor {
    pub log10_bf: f64,
    /// One per prior odds, in input order.
    pub posterior_probs: Vec<f64>,
    /// One per p-value method, in input order.
    pub p_values: Vec<f64>,
    /// Whether U was positive definite and every inversion succeeded.
    pub converged: bool,
}

impl BayesFactor {
    fn missing(n_prior_odds: usize, n_methods: usize) -> Self {
        BayesFactor {
            log10_bf: f64::NAN,
            posterior_probs: vec![f64::NAN; n_prior_odds],
            p_values: vec![f64::NAN; n_methods],
            converged: false,
        }
    }
}

/// Posterior probability of association for each prior odds.
pub fn posterior_probs(log10_bf: f64, prior_odds: &[f64]) -> Vec<f64> {
    let bf = 10f64.powf(log10_bf);
    prior_odds
        .iter()
        .map(|odds| {
            let posterior_odds = odds * bf;
            if posterior_odds.is_infinite() {
                1.0
            } else {
                posterior_odds / (1.0 + posterior_odds)
            }
        })
        .collect()
}

/// Closed-form log10 Bayes factor of the alternative (effects drawn from
/// N(mu, U)) against the null (no effect), given estimates with error
/// covariance V.
pub fn bayes_factor(
    params: &BlockParams,
    block: &str,
    prior_odds: &[f64],
    methods: &[PValueMethod],
) -> BayesFactor {
    let n = params.beta.len();
    if n == 0 {
        return BayesFactor::missing(prior_odds.len(), methods.len());
    }

    let v_inv = safe_inv(&params.v_beta, "v_beta", block);
    let u_inv = safe_inv(&params.u, "U", block);
    let (v_inv, u_inv) = match (v_inv, u_inv) {
        (Some(v), Some(u)) => (v, u),
        _ => return BayesFactor::missing(prior_odds.len(), methods.len()),
    };
    let sum_inv = match safe_inv(&(&u_inv + &v_inv), "U_inv + v_beta_inv", block) {
        Some(x) => x,
        None => return BayesFactor::missing(prior_odds.len(), methods.len()),
    };

    let beta = &params.beta;
    let centered = beta - &params.mu;
    let fat_middle = &v_inv - &v_inv * sum_inv * &v_inv;

    let log_det = log_abs_det(&(DMatrix::<f64>::identity(n, n) + &v_inv * &params.u));
    let log_bf = -0.5 * log_det + 0.5 * beta.dot(&(&v_inv * beta))
        - 0.5 * centered.dot(&(&fat_middle * &centered));
    let log10_bf = log_bf / std::f64::consts::LN_10;

    let posterior_probs = posterior_probs(log10_bf, prior_odds);
    let p_values = if methods.is_empty() {
        Vec::new()
    } else {
        bf_p_values(beta, &params.u, &params.v_beta, &v_inv, methods, block)
    };

    BayesFactor {
        log10_bf,
        posterior_probs,
        p_values,
        converged: params.converged && log10_bf.is_finite(),
    }
}

/// P-values of the quadratic form `beta' (V^-1 - (V + U)^-1) beta` that the
/// Bayes factor is monotone in, under the null beta ~ N(0, V).
pub fn bf_p_values(
    beta: &DVector<f64>,
    u: &DMatrix<f64>,
    v_beta: &DMatrix<f64>,
    v_beta_inv: &DMatrix<f64>,
    methods: &[PValueMethod],
    block: &str,
) -> Vec<f64> {
    let missing = vec![f64::NAN; methods.len()];

    let (a, _) = is_pos_def_and_full_rank(&(v_beta + u), 0.99);
    if a.iter().any(|x| x.is_nan()) {
        return missing;
    }
    let a_inv = match a.clone().try_inverse() {
        Some(a_inv) => a_inv,
        None => return missing,
    };
    let quad_t = beta.dot(&((v_beta_inv - &a_inv) * beta));

    let weights = match qf_weights(&a, u) {
        Some(weights) => weights,
        None => {
            debug!("No quadratic form weights for {}", block);
            return missing;
        }
    };

    methods
        .iter()
        .map(|method| {
            let p = qf::upper_tail(*method, quad_t, &weights);
            if p.is_nan() {
                p
            } else {
                p.clamp(0.0, 1.0)
            }
        })
        .collect()
}

/// Eigenvalues of I - A^-1 V = A^-1 U above `MIN_QF_WEIGHT`, taken from the
/// similar symmetric matrix L^-1 U L^-T where A = L L'.
fn qf_weights(a: &DMatrix<f64>, u: &DMatrix<f64>) -> Option<Vec<f64>> {
    let l = a.clone().cholesky()?.l();
    let l_inv = l.try_inverse()?;
    let b = symmetrize(&(&l_inv * u * l_inv.transpose()));
    let (b, _) = is_pos_def_and_full_rank(&b, 0.99);
    let weights: Vec<f64> = b
        .symmetric_eigenvalues()
        .iter()
        .copied()
        .filter(|&d| d > MIN_QF_WEIGHT)
        .collect();
    if weights.is_empty() {
        None
    } else {
        Some(weights)
    }
}
