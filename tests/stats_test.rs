use mrp::annotation::{Category, VariantAnnotation};
use mrp::io::mapfile::MapFile;
use mrp::io::sumstats::VariantRecord;
use mrp::model::{CorrelationModel, PValueMethod};
use mrp::stats::bayes::{bayes_factor, block_params, posterior_probs, SharedMatrices};
use mrp::stats::linalg::{is_pos_def_and_full_rank, log_abs_det, safe_inv};
use mrp::stats::qf::davies::{Davies, DaviesFault};
use mrp::stats::{correlation, qf};
use nalgebra::DMatrix;
use statrs::distribution::{ChiSquared, ContinuousCDF};

const METHODS: [PValueMethod; 3] = [
    PValueMethod::Davies,
    PValueMethod::Farebrother,
    PValueMethod::Imhof,
];

fn chi_squared_upper_tail(q: f64, dof: f64) -> f64 {
    1.0 - ChiSquared::new(dof).unwrap().cdf(q)
}

fn variant(beta: Vec<Option<f64>>, se: Vec<Option<f64>>) -> VariantRecord {
    VariantRecord {
        id: "1:100:A:G".to_string(),
        gene_symbol: "GENE".to_string(),
        consequence: "stop_gained".to_string(),
        annotation: VariantAnnotation {
            category: Some(Category::Ptv),
            mpc: None,
            pli: false,
        },
        maf: Some(0.001),
        ld_indep: false,
        p: vec![None; beta.len()],
        beta,
        se,
    }
}

fn ones(n: usize) -> DMatrix<f64> {
    DMatrix::from_element(n, n, 1.0)
}

#[test]
fn quadratic_form_single_term() {
    for q in [0.5, 2.0, 3.841_458_820_694_124, 9.0] {
        let expected = chi_squared_upper_tail(q, 1.0);
        for method in METHODS {
            let p = qf::upper_tail(method, q, &[1.0]);
            assert!(
                (p - expected).abs() < 1e-3,
                "{} q={} got {} expected {}",
                method,
                q,
                p,
                expected
            );
        }
    }
}

#[test]
fn quadratic_form_equal_weights() {
    // 2 chi2_1 + 2 chi2_1 is 2 chi2_2, and 0.5 (chi2_4) has the tail e^-q (1 + q)
    for q in [1.0, 4.0, 10.0] {
        let two = (-q / 4.0f64).exp();
        let half = (-q).exp() * (1.0 + q);
        for method in METHODS {
            let p = qf::upper_tail(method, q, &[2.0, 2.0]);
            assert!((p - two).abs() < 1e-3, "{} q={} got {} expected {}", method, q, p, two);
            let p = qf::upper_tail(method, q, &[0.5; 4]);
            assert!((p - half).abs() < 1e-3, "{} q={} got {} expected {}", method, q, p, half);
        }
    }
}

#[test]
fn quadratic_form_methods_agree() {
    let lambdas = [3.0, 1.2, 0.6, 0.25, 0.05];
    for q in [0.5, 3.0, 8.0, 20.0] {
        let p: Vec<f64> = METHODS
            .iter()
            .map(|&method| qf::upper_tail(method, q, &lambdas))
            .collect();
        assert!(p.iter().all(|x| (0.0..=1.0).contains(x)), "{:?}", p);
        assert!((p[0] - p[1]).abs() < 1e-3, "q={} {:?}", q, p);
        assert!((p[1] - p[2]).abs() < 1e-3, "q={} {:?}", q, p);
    }
}

#[test]
fn quadratic_form_nonpositive_point() {
    assert_eq!(qf::upper_tail(PValueMethod::Farebrother, 0.0, &[1.0, 2.0]), 1.0);
    assert_eq!(qf::upper_tail(PValueMethod::Imhof, -1.0, &[1.0, 2.0]), 1.0);
}

#[test]
fn davies_without_accuracy_reports_one() {
    let result = Davies::default().upper_tail(1e-6, &[1.0]);
    assert_eq!(result.fault, Some(DaviesFault::AccuracyNotAchieved));
    assert_eq!(result.value, 1.0);

    // the exact tail is 0.9992
    let p = qf::upper_tail(PValueMethod::Davies, 1e-6, &[1.0]);
    assert!((p - chi_squared_upper_tail(1e-6, 1.0)).abs() < 1e-3, "{}", p);
}

#[test]
fn scalar_bayes_factor_closed_form() {
    let (b, se, sigma) = (0.1, 0.05, 0.2);
    let record = variant(vec![Some(b)], vec![Some(se)]);
    let shared = SharedMatrices::new(CorrelationModel::Similar, 1, &ones(1), &ones(1));
    let params = block_params(&[&record], &[sigma], CorrelationModel::Independent, &shared, 0.0);
    assert!(params.converged);

    let result = bayes_factor(&params, "GENE", &[0.0005], &METHODS);

    let (u, v) = (sigma * sigma, se * se);
    let log_bf = -0.5 * (1.0 + u / v).ln() + 0.5 * b * b / v - 0.5 * b * b / (u + v);
    let expected = log_bf / std::f64::consts::LN_10;
    assert!((result.log10_bf - expected).abs() < 1e-10);
    assert!(result.converged);

    let bf = 10f64.powf(expected);
    let posterior = 0.0005 * bf / (1.0 + 0.0005 * bf);
    assert!((result.posterior_probs[0] - posterior).abs() < 1e-12);

    // the quadratic form reduces to z^2 with z = b / se
    let p_expected = chi_squared_upper_tail((b / se).powi(2), 1.0);
    for (method, p) in METHODS.iter().zip(&result.p_values) {
        assert!((p - p_expected).abs() < 1e-3, "{} {} {}", method, p, p_expected);
    }
}

#[test]
fn missing_effects_are_removed() {
    let record = variant(
        vec![Some(0.1), None, Some(-0.05), Some(0.02)],
        vec![Some(0.05), Some(0.05), None, Some(0.05)],
    );
    let err_corr = DMatrix::identity(4, 4);
    let shared = SharedMatrices::new(CorrelationModel::Independent, 2, &ones(2), &err_corr);
    let params = block_params(&[&record], &[0.2], CorrelationModel::Independent, &shared, 0.0);
    assert_eq!(params.beta.len(), 2);
    assert_eq!(params.u.shape(), (2, 2));
    assert_eq!(params.v_beta.shape(), (2, 2));
    assert_eq!(params.beta[1], 0.02);
}

#[test]
fn block_without_effects_is_missing() {
    let record = variant(vec![None], vec![None]);
    let shared = SharedMatrices::new(CorrelationModel::Similar, 1, &ones(1), &ones(1));
    let params = block_params(&[&record], &[0.2], CorrelationModel::Independent, &shared, 0.0);
    let result = bayes_factor(&params, "GENE", &[0.0005], &[PValueMethod::Davies]);
    assert!(result.log10_bf.is_nan());
    assert!(result.posterior_probs[0].is_nan());
    assert!(result.p_values[0].is_nan());
    assert!(!result.converged);
}

#[test]
fn posterior_probabilities() {
    let probs = posterior_probs(2.0, &[0.01, 1.0]);
    assert!((probs[0] - 0.5).abs() < 1e-12);
    assert!((probs[1] - 100.0 / 101.0).abs() < 1e-12);
    assert_eq!(posterior_probs(400.0, &[0.5]), vec![1.0]);
}

#[test]
fn positive_definite_adjustment() {
    let x = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
    let (adjusted, converged) = is_pos_def_and_full_rank(&x, 0.99);
    assert!(converged);
    assert_eq!(adjusted, x);

    // singular after one shrink, positive definite after two
    let x = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
    let (adjusted, converged) = is_pos_def_and_full_rank(&x, 0.5);
    assert!(converged);
    assert!((adjusted[(0, 1)] - 0.5).abs() < 1e-12);
    assert_eq!(adjusted[(1, 1)], 1.0);

    let (adjusted, converged) = is_pos_def_and_full_rank(&x, 0.4);
    assert!(converged);
    assert!((adjusted[(0, 1)] - 0.8).abs() < 1e-12);

    // five shrinks are not enough
    let (adjusted, converged) = is_pos_def_and_full_rank(&x, 0.99);
    assert!(!converged);
    assert!((adjusted[(0, 1)] - 2.0 * 0.99f64.powi(5)).abs() < 1e-12);

    // all ones is singular, one shrink fixes it
    let (adjusted, converged) = is_pos_def_and_full_rank(&ones(3), 0.99);
    assert!(converged);
    assert!((adjusted[(0, 2)] - 0.99).abs() < 1e-12);
}

#[test]
fn determinant_and_inverse() {
    let x = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
    assert!((log_abs_det(&x) - 5f64.ln()).abs() < 1e-12);

    let inverse = safe_inv(&x, "x", "test").unwrap();
    let identity = &x * inverse;
    assert!((identity - DMatrix::<f64>::identity(2, 2)).norm() < 1e-12);
}

#[test]
fn pearson_correlation() {
    let x = [1.0, 2.0, 3.0, 4.0, 5.0];
    let y = [2.0, 4.0, 6.0, 8.0, 10.0];
    let (r, p) = correlation::pearson(&x, &y).unwrap();
    assert!((r - 1.0).abs() < 1e-12);
    assert_eq!(p, 0.0);

    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let y = [1.2, 1.9, 3.4, 3.1, 5.5, 5.0];
    let (r, p) = correlation::pearson(&x, &y).unwrap();
    assert!((r - 0.937_83).abs() < 1e-3, "{}", r);
    assert!(p > 0.001 && p < 0.01, "{}", p);

    assert!(correlation::pearson(&[1.0, 2.0], &[2.0, 1.0]).is_none());
    assert!(correlation::pearson(&[1.0, 1.0, 1.0], &[2.0, 1.0, 3.0]).is_none());
}

#[test]
fn single_study_and_phenotype_correlations() {
    let map_file = MapFile {
        entries: Vec::new(),
        studies: vec!["study".to_string()],
        phenotypes: vec!["pheno".to_string()],
    };
    assert_eq!(correlation::build_err_corr(&[], &map_file), ones(1));
    assert_eq!(correlation::build_r_phen(&[], &map_file), ones(1));

    // no usable variants falls back to independence
    let map_file = MapFile {
        entries: Vec::new(),
        studies: vec!["study".to_string()],
        phenotypes: vec!["pheno_1".to_string(), "pheno_2".to_string()],
    };
    assert_eq!(
        correlation::build_err_corr(&[], &map_file),
        DMatrix::identity(2, 2)
    );
    assert_eq!(
        correlation::build_r_phen(&[], &map_file),
        DMatrix::identity(2, 2)
    );
}
