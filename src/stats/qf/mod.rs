//! Distribution of a quadratic form `Q = sum_j lambda_j X_j^2` in independent
//! standard normal variables, used to turn Bayes factors into p-values.

use log::debug;

use crate::model::PValueMethod;

pub mod davies;
pub mod farebrother;
pub mod imhof;

/// P(Q > q) for central chi-squared terms with one degree of freedom each,
/// using the requested method. Returns NaN when the method cannot produce
/// a probability.
pub fn upper_tail(method: PValueMethod, q: f64, lambdas: &[f64]) -> f64 {
    match method {
        PValueMethod::Davies => {
            let result = davies::Davies::default().upper_tail(q, lambdas);
            if let Some(fault) = result.fault {
                debug!("Davies method reported {:?} at q = {}", fault, q);
            }
            result.value
        }
        PValueMethod::Farebrother => {
            let result = farebrother::Farebrother::default().upper_tail(q, lambdas);
            if let Some(fault) = result.fault {
                debug!("Farebrother method reported {:?} at q = {}", fault, q);
            }
            result.value
        }
        PValueMethod::Imhof => {
            let result = imhof::Imhof::default().upper_tail(q, lambdas);
            if result.abs_error > 1e-6 {
                debug!(
                    "Imhof integration error estimate {} at q = {}",
                    result.abs_error, q
                );
            }
            result.value
        }
    }
}
