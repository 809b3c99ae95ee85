//! Farebrother's implementation (Applied Statistics AS 204) of Ruben's
//! series expansion for a positive-definite linear combination of
//! non-central chi-squared variables.

use statrs::function::erf::erf;

/// log(sqrt(pi / 2))
const LOG_SQRT_PI_OVER_2: f64 = 0.225_791_352_644_727_4;

/// Log-densities below this switch the recursion to log space.
const LOG_TOLERANCE: f64 = -200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarebrotherFault {
    /// A weight was not positive, a multiplicity was zero or a
    /// non-centrality was negative.
    InvalidTerm(usize),
    /// The point was not positive, or maxit / eps were invalid.
    InvalidParameters,
    /// The leading coefficient of the expansion underflowed.
    Underflow,
    /// The series became unstable.
    Divergence,
    /// maxit terms did not reach the requested accuracy.
    NotConverged,
    /// The probability fell outside [0, 1].
    ProbabilityOutOfRange,
    /// The density came out negative.
    NegativeDensity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FarebrotherResult {
    pub value: f64,
    pub density: f64,
    pub fault: Option<FarebrotherFault>,
}

#[derive(Debug, Clone, Copy)]
pub struct Farebrother {
    /// Scale of the series' chi-squared reference relative to the smallest
    /// weight. Non-positive values select the harmonic mean of the extreme
    /// weights.
    pub mode: f64,
    pub maxit: usize,
    pub eps: f64,
}

impl Default for Farebrother {
    fn default() -> Self {
        Farebrother {
            mode: 1.0,
            maxit: 100_000,
            eps: 1e-16,
        }
    }
}

impl Farebrother {
    /// P(Q > q) for `Q = sum_j lambda_j chi2_1` with positive weights.
    pub fn upper_tail(&self, q: f64, lambdas: &[f64]) -> FarebrotherResult {
        // A positive-definite form has no mass at or below zero.
        if q <= 0.0 {
            return FarebrotherResult {
                value: 1.0,
                density: 0.0,
                fault: None,
            };
        }
        let mult = vec![1; lambdas.len()];
        let delta = vec![0.0; lambdas.len()];
        let mut result = self.cdf(q, lambdas, &mult, &delta);
        if !result.value.is_nan() {
            result.value = 1.0 - result.value;
        }
        result
    }

    /// P(Q < c) for `Q = sum_j lambda_j chi2(mult_j, delta_j)`.
    pub fn cdf(&self, c: f64, lambda: &[f64], mult: &[usize], delta: &[f64]) -> FarebrotherResult {
        let failed = |fault| FarebrotherResult {
            value: f64::NAN,
            density: f64::NAN,
            fault: Some(fault),
        };

        let n = lambda.len();
        if n < 1 || c <= 0.0 || self.maxit < 1 || self.eps <= 0.0 {
            return failed(FarebrotherFault::InvalidParameters);
        }

        // preliminaries
        let mut min_lambda = lambda[0];
        let mut max_lambda = lambda[0];
        for i in 0..n {
            let hold = lambda[i];
            if hold <= 0.0 || mult[i] < 1 || delta[i] < 0.0 {
                return failed(FarebrotherFault::InvalidTerm(i));
            }
            min_lambda = min_lambda.min(hold);
            max_lambda = max_lambda.max(hold);
        }
        let bbeta = if self.mode > 0.0 {
            self.mode * min_lambda
        } else {
            2.0 / (1.0 / min_lambda + 1.0 / max_lambda)
        };

        let mut gamma = vec![0.0; n];
        let mut theta = vec![1.0; n];
        let mut k: usize = 0;
        let mut log_sum = 0.0;
        let mut sum_delta = 0.0;
        for i in 0..n {
            let hold = bbeta / lambda[i];
            gamma[i] = 1.0 - hold;
            log_sum += mult[i] as f64 * hold.ln();
            sum_delta += delta[i];
            k += mult[i];
        }
        let ao = (0.5 * (log_sum - sum_delta)).exp();
        if ao <= 0.0 {
            return FarebrotherResult {
                value: 0.0,
                density: 0.0,
                fault: Some(FarebrotherFault::Underflow),
            };
        }
        let z = c / bbeta;

        // probability and density of chi-squared on k degrees of freedom
        let (mut i, mut lans, mut dans, mut pans) = if k % 2 == 0 {
            let lans = -0.5 * z;
            let dans = lans.exp();
            (2i64, lans, dans, 1.0 - dans)
        } else {
            let lans = -0.5 * (z + z.ln()) - LOG_SQRT_PI_OVER_2;
            (1i64, lans, lans.exp(), erf((0.5 * z).sqrt()))
        };
        let mut k = k as i64 - 2;
        while i <= k {
            if lans < LOG_TOLERANCE {
                lans += (z / i as f64).ln();
                dans = lans.exp();
            } else {
                dans *= z / i as f64;
            }
            pans -= dans;
            i += 2;
        }

        // successive terms of the expansion
        let mut prbty = pans;
        let mut dnsty = dans;
        let eps2 = self.eps / ao;
        let aoinv = 1.0 / ao;
        let mut sum = aoinv - 1.0;
        let mut a = vec![0.0];
        let mut b = vec![0.0];
        let mut fault = Some(FarebrotherFault::NotConverged);

        for m in 1..=self.maxit {
            let mut sum1 = 0.0;
            for j in 0..n {
                let hold = theta[j];
                let hold2 = hold * gamma[j];
                theta[j] = hold2;
                sum1 += hold2 * mult[j] as f64 + m as f64 * delta[j] * (hold - hold2);
            }
            sum1 *= 0.5;
            b.push(sum1);
            for j in (1..m).rev() {
                sum1 += b[j] * a[m - j];
            }
            let coefficient = sum1 / m as f64;
            a.push(coefficient);

            k += 2;
            if lans < LOG_TOLERANCE {
                lans += (z / k as f64).ln();
                dans = lans.exp();
            } else {
                dans *= z / k as f64;
            }
            pans -= dans;
            sum -= coefficient;
            dnsty += dans * coefficient;
            let term = pans * coefficient;
            prbty += term;
            if prbty < -aoinv {
                return failed(FarebrotherFault::Divergence);
            }
            if (pans * sum).abs() < eps2 && term.abs() < eps2 {
                fault = None;
                break;
            }
        }

        let density = ao * dnsty / (bbeta + bbeta);
        let value = ao * prbty;
        let fault = if !(0.0..=1.0).contains(&value) {
            Some(FarebrotherFault::ProbabilityOutOfRange)
        } else if density < 0.0 {
            Some(FarebrotherFault::NegativeDensity)
        } else {
            fault
        };

        FarebrotherResult {
            value,
            density,
            fault,
        }
    }
}
