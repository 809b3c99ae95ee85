//! Imhof's method: P(Q > q) = 1/2 + (1/pi) * int_0^inf sin(theta(u)) / (u rho(u)) du
//! with
//!   theta(u) = 1/2 sum_j atan(lambda_j u) - q u / 2
//!   rho(u)   = prod_j (1 + lambda_j^2 u^2)^(1/4).
//!
//! The integral is split at a point past which the integrand oscillates with
//! an almost constant half-period of 2 pi / q. The head is integrated by
//! adaptive Gauss-Kronrod quadrature and the tail as a sum of half-period
//! panels, accelerated by repeated averaging of its partial sums.

use std::f64::consts::PI;

const XGK: [f64; 8] = [
    0.991_455_371_120_812_6,
    0.949_107_912_342_758_5,
    0.864_864_423_359_769_1,
    0.741_531_185_599_394_4,
    0.586_087_235_467_691_1,
    0.405_845_151_377_397_2,
    0.207_784_955_007_898_5,
    0.0,
];

const WGK: [f64; 8] = [
    0.022_935_322_010_529_22,
    0.063_092_092_629_978_55,
    0.104_790_010_322_250_2,
    0.140_653_259_715_525_9,
    0.169_004_726_639_267_9,
    0.190_350_578_064_785_4,
    0.204_432_940_075_298_9,
    0.209_482_141_084_727_8,
];

const WG: [f64; 4] = [
    0.129_484_966_168_869_7,
    0.279_705_391_489_276_7,
    0.381_830_050_505_118_9,
    0.417_959_183_673_469_4,
];

/// Number of tail panels whose partial sums are averaged.
const TAIL_PANELS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImhofResult {
    pub value: f64,
    /// Estimated absolute error of the integral.
    pub abs_error: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Imhof {
    pub epsabs: f64,
    /// Maximum number of sub-intervals of the head integral.
    pub limit: usize,
}

impl Default for Imhof {
    fn default() -> Self {
        Imhof {
            epsabs: 1e-10,
            limit: 10_000,
        }
    }
}

/// 15-point Kronrod rule with the embedded 7-point Gauss rule. Returns the
/// Kronrod estimate and |Kronrod - Gauss|.
fn gauss_kronrod<F: Fn(f64) -> f64>(f: &F, a: f64, b: f64) -> (f64, f64) {
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);
    let fc = f(center);
    let mut resk = fc * WGK[7];
    let mut resg = fc * WG[3];
    for j in 0..3 {
        let jtw = 2 * j + 1;
        let x = half * XGK[jtw];
        let sum = f(center - x) + f(center + x);
        resg += WG[j] * sum;
        resk += WGK[jtw] * sum;
    }
    for j in 0..4 {
        let jtwm1 = 2 * j;
        let x = half * XGK[jtwm1];
        resk += WGK[jtwm1] * (f(center - x) + f(center + x));
    }
    (resk * half, ((resk - resg) * half).abs())
}

/// Adaptive bisection of the interval with the largest error estimate,
/// starting from `panels` equal sub-intervals of [a, b].
fn adaptive<F: Fn(f64) -> f64>(
    f: &F,
    a: f64,
    b: f64,
    panels: usize,
    epsabs: f64,
    limit: usize,
) -> (f64, f64) {
    let panels = panels.clamp(1, limit.max(1));
    let width = (b - a) / panels as f64;
    let mut intervals: Vec<(f64, f64, f64, f64)> = (0..panels)
        .map(|i| {
            let lo = a + i as f64 * width;
            let hi = if i + 1 == panels { b } else { lo + width };
            let (value, error) = gauss_kronrod(f, lo, hi);
            (lo, hi, value, error)
        })
        .collect();

    let total_error =
        |intervals: &[(f64, f64, f64, f64)]| intervals.iter().map(|x| x.3).sum::<f64>();
    while intervals.len() < limit && total_error(&intervals) > epsabs {
        let (worst, _) = intervals
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, best_err), (i, x)| {
                if x.3 > best_err {
                    (i, x.3)
                } else {
                    (best, best_err)
                }
            });
        let (lo, hi, _, _) = intervals[worst];
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        let (left, left_err) = gauss_kronrod(f, lo, mid);
        let (right, right_err) = gauss_kronrod(f, mid, hi);
        intervals[worst] = (lo, mid, left, left_err);
        intervals.push((mid, hi, right, right_err));
    }

    let value = intervals.iter().map(|x| x.2).sum();
    (value, total_error(&intervals))
}

impl Imhof {
    /// P(Q > q) for `Q = sum_j lambda_j chi2_1`.
    pub fn upper_tail(&self, q: f64, lambdas: &[f64]) -> ImhofResult {
        if lambdas.is_empty() || lambdas.iter().any(|l| !l.is_finite()) || !q.is_finite() {
            return ImhofResult {
                value: f64::NAN,
                abs_error: f64::NAN,
            };
        }
        if q <= 0.0 && lambdas.iter().all(|&l| l > 0.0) {
            return ImhofResult {
                value: 1.0,
                abs_error: 0.0,
            };
        }

        let integrand = |u: f64| {
            if u <= 0.0 {
                return 0.5 * (lambdas.iter().sum::<f64>() - q);
            }
            let mut theta = -0.5 * q * u;
            let mut log_rho = 0.0;
            for &l in lambdas {
                theta += 0.5 * (l * u).atan();
                log_rho += 0.25 * (1.0 + (l * u).powi(2)).ln();
            }
            theta.sin() / (u * log_rho.exp())
        };

        let min_lambda = lambdas
            .iter()
            .map(|l| l.abs())
            .filter(|&l| l > 0.0)
            .fold(f64::INFINITY, f64::min);
        let half_period = if q.abs() > 0.0 {
            2.0 * PI / q.abs()
        } else {
            f64::INFINITY
        };

        // head: until every arctangent is close to saturation, or until the
        // envelope alone is negligible
        let saturation = 20.0 / min_lambda;
        let split = if half_period.is_finite() {
            saturation.max(half_period)
        } else {
            saturation
        };
        let cutoff = envelope_cutoff(lambdas, 0.5 * self.epsabs);
        let head_end = split.min(cutoff);
        let head_panels = if half_period.is_finite() {
            ((head_end / half_period).ceil() as usize).min(self.limit / 2)
        } else {
            16
        };
        let (head, head_error) = adaptive(
            &integrand,
            0.0,
            head_end,
            head_panels,
            0.5 * self.epsabs,
            self.limit,
        );

        let (tail, tail_error) = if cutoff <= split {
            (0.0, 0.5 * self.epsabs)
        } else if half_period.is_finite() {
            self.oscillating_tail(&integrand, split, half_period)
        } else {
            // no oscillation: the integrand decays like the envelope alone
            adaptive(
                &|t: f64| {
                    // u = split / t maps (0, 1] onto [split, inf)
                    if t <= 0.0 {
                        0.0
                    } else {
                        integrand(split / t) * split / (t * t)
                    }
                },
                0.0,
                1.0,
                16,
                0.5 * self.epsabs,
                self.limit,
            )
        };

        ImhofResult {
            value: 0.5 + (head + tail) / PI,
            abs_error: (head_error + tail_error) / PI,
        }
    }

    /// Sum of half-period panels from `start`, accelerated by repeated
    /// averaging of partial sums.
    fn oscillating_tail<F: Fn(f64) -> f64>(
        &self,
        f: &F,
        start: f64,
        half_period: f64,
    ) -> (f64, f64) {
        let mut partial_sums = Vec::with_capacity(TAIL_PANELS);
        let mut sum = 0.0;
        let mut quadrature_error = 0.0;
        for i in 0..TAIL_PANELS {
            let lo = start + i as f64 * half_period;
            let (value, error) = adaptive(f, lo, lo + half_period, 1, 1e-3 * self.epsabs, 64);
            sum += value;
            quadrature_error += error;
            partial_sums.push(sum);
        }

        let value = repeated_average(&partial_sums);
        let coarser = repeated_average(&partial_sums[..TAIL_PANELS - 1]);
        (value, (value - coarser).abs() + quadrature_error)
    }
}

/// Average neighbouring partial sums until a single value is left.
fn repeated_average(partial_sums: &[f64]) -> f64 {
    let mut level = partial_sums.to_vec();
    while level.len() > 1 {
        level = level
            .windows(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect();
    }
    level.first().copied().unwrap_or(0.0)
}

/// Point beyond which the integrand's envelope integrates to less than
/// `epsabs`, from rho(u) >= prod_j sqrt(|lambda_j| u).
fn envelope_cutoff(lambdas: &[f64], epsabs: f64) -> f64 {
    let nonzero: Vec<f64> = lambdas.iter().map(|l| l.abs()).filter(|&l| l > 0.0).collect();
    if nonzero.is_empty() {
        return f64::INFINITY;
    }
    let r = nonzero.len() as f64;
    let log_scale: f64 = nonzero.iter().map(|l| 0.5 * l.ln()).sum();
    let log_cutoff = (2.0 / r) * (2f64.ln() - r.ln() - epsabs.ln() - log_scale);
    log_cutoff.exp()
}
