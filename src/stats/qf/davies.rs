//! Davies' algorithm (Applied Statistics AS 155) for the distribution of a
//! linear combination of non-central chi-squared variables, by numerical
//! inversion of the characteristic function with explicit bounds on the
//! truncation and integration errors.

use std::f64::consts::PI;

/// log(2) / 8
const LOG28: f64 = 0.0866;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaviesFault {
    /// Required accuracy not achieved.
    AccuracyNotAchieved,
    /// Round-off error possibly significant.
    RoundOff,
    InvalidParameters,
    /// Unable to locate integration parameters within the term limit.
    IntegrationParameters,
}

/// Diagnostics of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trace {
    pub absolute_sum: f64,
    pub total_terms: f64,
    pub integrations: f64,
    pub final_interval: f64,
    pub initial_truncation: f64,
    pub convergence_factor_sd: f64,
    pub cycles: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DaviesResult {
    pub value: f64,
    pub fault: Option<DaviesFault>,
    pub trace: Trace,
}

#[derive(Debug, Clone, Copy)]
pub struct Davies {
    /// Coefficient of an added standard normal variable.
    pub sigma: f64,
    /// Maximum number of integration terms.
    pub limit: usize,
    /// Maximum error of the returned probability.
    pub accuracy: f64,
}

impl Default for Davies {
    fn default() -> Self {
        Davies {
            sigma: 0.0,
            limit: 10_000,
            accuracy: 1e-4,
        }
    }
}

impl Davies {
    /// P(Q > q) for `Q = sum_j lambda_j chi2_1`. When a fault leaves no
    /// estimate of the lower tail the result is 1, with the fault kept.
    pub fn upper_tail(&self, q: f64, lambdas: &[f64]) -> DaviesResult {
        let dof = vec![1.0; lambdas.len()];
        let noncentrality = vec![0.0; lambdas.len()];
        let mut result = self.cdf(q, lambdas, &noncentrality, &dof);
        result.value = if result.value.is_nan() {
            1.0
        } else {
            1.0 - result.value
        };
        result
    }

    /// P(Q < c) for `Q = sum_j lb_j chi2(n_j, nc_j) + sigma X`. The value is
    /// NaN when a fault prevents an estimate.
    pub fn cdf(&self, c: f64, lb: &[f64], nc: &[f64], n: &[f64]) -> DaviesResult {
        let mut state = State::new(lb, nc, n, c, self.sigma, self.limit);
        let mut trace = Trace::default();
        let outcome = state.qf(self.accuracy, &mut trace);
        trace.cycles = state.count as f64;
        match outcome {
            Ok((value, fault)) => DaviesResult {
                value: if value < 0.0 { f64::NAN } else { value },
                fault,
                trace,
            },
            Err(LimitExceeded) => DaviesResult {
                value: f64::NAN,
                fault: Some(DaviesFault::IntegrationParameters),
                trace,
            },
        }
    }
}

struct LimitExceeded;

fn exp1(x: f64) -> f64 {
    if x < -50.0 {
        0.0
    } else {
        x.exp()
    }
}

/// `log(1 + x)` if `first`, else `log(1 + x) - x`, accurate for small x.
fn log1(x: f64, first: bool) -> f64 {
    if x.abs() > 0.1 {
        if first {
            (1.0 + x).ln()
        } else {
            (1.0 + x).ln() - x
        }
    } else {
        let mut y = x / (2.0 + x);
        let mut term = 2.0 * y.powi(3);
        let mut k = 3.0;
        let mut s = if first { 2.0 } else { -x } * y;
        y *= y;
        let mut s1 = s + term / k;
        while s1 != s {
            k += 2.0;
            term *= y;
            s = s1;
            s1 = s + term / k;
        }
        s
    }
}

struct State<'a> {
    lb: &'a [f64],
    nc: &'a [f64],
    n: &'a [f64],
    c: f64,
    sigma: f64,
    sigsq: f64,
    lmax: f64,
    lmin: f64,
    mean: f64,
    intl: f64,
    ersm: f64,
    count: usize,
    lim: usize,
    th: Vec<usize>,
    sorted: bool,
    fail: bool,
}

impl<'a> State<'a> {
    fn new(lb: &'a [f64], nc: &'a [f64], n: &'a [f64], c: f64, sigma: f64, lim: usize) -> Self {
        State {
            lb,
            nc,
            n,
            c,
            sigma,
            sigsq: 0.0,
            lmax: 0.0,
            lmin: 0.0,
            mean: 0.0,
            intl: 0.0,
            ersm: 0.0,
            count: 0,
            lim,
            th: Vec::new(),
            sorted: false,
            fail: false,
        }
    }

    fn r(&self) -> usize {
        self.lb.len()
    }

    fn counter(&mut self) -> Result<(), LimitExceeded> {
        self.count += 1;
        if self.count > self.lim {
            Err(LimitExceeded)
        } else {
            Ok(())
        }
    }

    /// Indices of `lb` by decreasing absolute value.
    fn order(&mut self) {
        let lb = self.lb;
        let mut th: Vec<usize> = (0..lb.len()).collect();
        th.sort_by(|&a, &b| {
            lb[b]
                .abs()
                .partial_cmp(&lb[a].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.th = th;
        self.sorted = true;
    }

    /// Bound on the tail probability using the moment generating function.
    /// Also returns the cutoff point.
    fn errbd(&mut self, u: f64) -> Result<(f64, f64), LimitExceeded> {
        self.counter()?;
        let mut xconst = u * self.sigsq;
        let mut sum1 = u * xconst;
        let u = 2.0 * u;
        for j in (0..self.r()).rev() {
            let nj = self.n[j];
            let lj = self.lb[j];
            let ncj = self.nc[j];
            let x = u * lj;
            let y = 1.0 - x;
            xconst += lj * (ncj / y + nj) / y;
            sum1 += ncj * (x / y).powi(2) + nj * (x.powi(2) / y + log1(-x, false));
        }
        Ok((exp1(-0.5 * sum1), xconst))
    }

    /// Find a cutoff such that P(Q > cutoff) < accx if `upn > 0`, or
    /// P(Q < cutoff) < accx otherwise.
    fn ctff(&mut self, accx: f64, upn: &mut f64) -> Result<f64, LimitExceeded> {
        let mut u2 = *upn;
        let mut u1 = 0.0;
        let mut c1 = self.mean;
        let rb = 2.0 * if u2 > 0.0 { self.lmax } else { self.lmin };

        let mut c2;
        loop {
            let (bound, cutoff) = self.errbd(u2 / (1.0 + u2 * rb))?;
            c2 = cutoff;
            if bound <= accx {
                break;
            }
            u1 = u2;
            c1 = c2;
            u2 *= 2.0;
        }

        let mut u = (c1 - self.mean) / (c2 - self.mean);
        while u < 0.9 {
            u = (u1 + u2) / 2.0;
            let (bound, xconst) = self.errbd(u / (1.0 + u * rb))?;
            if bound > accx {
                u1 = u;
                c1 = xconst;
            } else {
                u2 = u;
                c2 = xconst;
            }
            u = (c1 - self.mean) / (c2 - self.mean);
        }
        *upn = u2;
        Ok(c2)
    }

    /// Bound on the integration error due to truncation at u.
    fn truncation(&mut self, u: f64, tausq: f64) -> Result<f64, LimitExceeded> {
        self.counter()?;
        let mut sum1 = 0.0;
        let mut prod2 = 0.0;
        let mut prod3 = 0.0;
        let mut s = 0.0;
        let sum2 = (self.sigsq + tausq) * u.powi(2);
        let mut prod1 = 2.0 * sum2;
        let u = 2.0 * u;
        for j in 0..self.r() {
            let lj = self.lb[j];
            let ncj = self.nc[j];
            let nj = self.n[j];
            let x = (u * lj).powi(2);
            sum1 += ncj * x / (1.0 + x);
            if x > 1.0 {
                prod2 += nj * x.ln();
                prod3 += nj * log1(x, true);
                s += nj;
            } else {
                prod1 += nj * log1(x, true);
            }
        }
        sum1 *= 0.5;
        prod2 += prod1;
        prod3 += prod1;
        let x = exp1(-sum1 - 0.25 * prod2) / PI;
        let y = exp1(-sum1 - 0.25 * prod3) / PI;
        let mut err1 = if s == 0.0 { 1.0 } else { x * 2.0 / s };
        let err2 = if prod3 > 1.0 { 2.5 * y } else { 1.0 };
        if err2 < err1 {
            err1 = err2;
        }
        let x = 0.5 * sum2;
        let err2 = if x <= y { 1.0 } else { y / x };
        Ok(if err1 < err2 { err1 } else { err2 })
    }

    /// Find u such that truncation(u) < accx and truncation(u / 1.2) > accx.
    fn findu(&mut self, utx: &mut f64, accx: f64) -> Result<(), LimitExceeded> {
        const DIVIS: [f64; 4] = [2.0, 1.4, 1.2, 1.1];
        let mut ut = *utx;
        let mut u = ut / 4.0;
        if self.truncation(u, 0.0)? > accx {
            u = ut;
            while self.truncation(u, 0.0)? > accx {
                ut *= 4.0;
                u = ut;
            }
        } else {
            ut = u;
            u /= 4.0;
            while self.truncation(u, 0.0)? <= accx {
                ut = u;
                u /= 4.0;
            }
        }
        for divis in DIVIS {
            u = ut / divis;
            if self.truncation(u, 0.0)? <= accx {
                ut = u;
            }
        }
        *utx = ut;
        Ok(())
    }

    /// Integrate with `nterm` terms at step `interv`. Unless `mainx`, the
    /// integrand is multiplied by `1 - exp(-tausq u^2 / 2)`.
    fn integrate(&mut self, nterm: usize, interv: f64, tausq: f64, mainx: bool) {
        let inpi = interv / PI;
        for k in (0..=nterm).rev() {
            let u = (k as f64 + 0.5) * interv;
            let mut sum1 = -2.0 * u * self.c;
            let mut sum2 = sum1.abs();
            let mut sum3 = -0.5 * self.sigsq * u.powi(2);
            for j in (0..self.r()).rev() {
                let nj = self.n[j];
                let x = 2.0 * self.lb[j] * u;
                let y = x.powi(2);
                sum3 -= 0.25 * nj * log1(y, true);
                let y = self.nc[j] * x / (1.0 + y);
                let z = nj * x.atan() + y;
                sum1 += z;
                sum2 += z.abs();
                sum3 -= 0.5 * x * y;
            }
            let mut x = inpi * exp1(sum3) / u;
            if !mainx {
                x *= 1.0 - exp1(-0.5 * tausq * u.powi(2));
            }
            self.intl += (0.5 * sum1).sin() * x;
            self.ersm += 0.5 * sum2 * x;
        }
    }

    /// Coefficient of tausq in the error when the convergence factor
    /// `exp(-tausq u^2 / 2)` is used and the distribution function is
    /// evaluated at x.
    fn cfe(&mut self, x: f64) -> Result<f64, LimitExceeded> {
        self.counter()?;
        if !self.sorted {
            self.order();
        }
        let mut axl = x.abs();
        let sxl = if x > 0.0 { 1.0 } else { -1.0 };
        let mut sum1 = 0.0;
        for j in (0..self.r()).rev() {
            let t = self.th[j];
            if self.lb[t] * sxl > 0.0 {
                let lj = self.lb[t].abs();
                let axl1 = axl - lj * (self.n[t] + self.nc[t]);
                let axl2 = lj / LOG28;
                if axl1 > axl2 {
                    axl = axl1;
                } else {
                    if axl > axl2 {
                        axl = axl2;
                    }
                    sum1 = (axl - axl1) / lj;
                    for k in (0..j).rev() {
                        let tk = self.th[k];
                        sum1 += self.n[tk] + self.nc[tk];
                    }
                    break;
                }
            }
        }
        if sum1 > 100.0 {
            self.fail = true;
            Ok(1.0)
        } else {
            Ok(2f64.powf(sum1 / 4.0) / (PI * axl.powi(2)))
        }
    }

    /// Returns P(Q < c), or -1 when a fault prevents an estimate.
    fn qf(
        &mut self,
        acc: f64,
        trace: &mut Trace,
    ) -> Result<(f64, Option<DaviesFault>), LimitExceeded> {
        let c = self.c;
        let mut acc1 = acc;
        let mut xlim = self.lim as f64;

        self.sigsq = self.sigma.powi(2);
        let mut sd = self.sigsq;
        for j in 0..self.r() {
            let nj = self.n[j];
            let lj = self.lb[j];
            let ncj = self.nc[j];
            if nj < 0.0 || ncj < 0.0 || !lj.is_finite() {
                return Ok((-1.0, Some(DaviesFault::InvalidParameters)));
            }
            sd += lj.powi(2) * (2.0 * nj + 4.0 * ncj);
            self.mean += lj * (nj + ncj);
            if self.lmax < lj {
                self.lmax = lj;
            } else if self.lmin > lj {
                self.lmin = lj;
            }
        }
        if sd == 0.0 {
            return Ok((if c > 0.0 { 1.0 } else { 0.0 }, None));
        }
        if self.lmin == 0.0 && self.lmax == 0.0 && self.sigma == 0.0 {
            return Ok((-1.0, Some(DaviesFault::InvalidParameters)));
        }
        let sd = sd.sqrt();
        let almx = if self.lmax < -self.lmin {
            -self.lmin
        } else {
            self.lmax
        };

        // starting values for findu, ctff
        let mut utx = 16.0 / sd;
        let mut up = 4.5 / sd;
        let mut un = -up;

        // truncation point with no convergence factor
        self.findu(&mut utx, 0.5 * acc1)?;

        // does a convergence factor help
        if c != 0.0 && almx > 0.07 * sd {
            let tausq = 0.25 * acc1 / self.cfe(c)?;
            if self.fail {
                self.fail = false;
            } else if self.truncation(utx, tausq)? < 0.2 * acc1 {
                self.sigsq += tausq;
                self.findu(&mut utx, 0.25 * acc1)?;
                trace.convergence_factor_sd = tausq.sqrt();
            }
        }
        trace.initial_truncation = utx;
        acc1 *= 0.5;

        let mut intv;
        let mut xnt;
        loop {
            // range of the distribution, quit if c is outside it
            let d1 = self.ctff(acc1, &mut up)? - c;
            if d1 < 0.0 {
                return Ok((1.0, None));
            }
            let d2 = c - self.ctff(acc1, &mut un)?;
            if d2 < 0.0 {
                return Ok((0.0, None));
            }

            intv = 2.0 * PI / d1.max(d2);
            xnt = utx / intv;
            let xntm = 3.0 / acc1.sqrt();
            if xnt <= xntm * 1.5 {
                break;
            }

            // auxiliary integration
            if xntm > xlim {
                return Ok((-1.0, Some(DaviesFault::AccuracyNotAchieved)));
            }
            let ntm = (xntm + 0.5).floor() as usize;
            let intv1 = utx / ntm as f64;
            let x = 2.0 * PI / intv1;
            if x <= c.abs() {
                break;
            }
            let tausq = 0.33 * acc1 / (1.1 * (self.cfe(c - x)? + self.cfe(c + x)?));
            if self.fail {
                break;
            }
            acc1 *= 0.67;
            self.integrate(ntm, intv1, tausq, false);
            xlim -= xntm;
            self.sigsq += tausq;
            trace.integrations += 1.0;
            trace.total_terms += ntm as f64 + 1.0;

            // truncation point with the new convergence factor
            self.findu(&mut utx, 0.25 * acc1)?;
            acc1 *= 0.75;
        }

        // main integration
        trace.final_interval = intv;
        if xnt > xlim {
            return Ok((-1.0, Some(DaviesFault::AccuracyNotAchieved)));
        }
        let nt = (xnt + 0.5).floor() as usize;
        self.integrate(nt, intv, 0.0, true);
        trace.integrations += 1.0;
        trace.total_terms += nt as f64 + 1.0;
        let qfval = 0.5 - self.intl;
        trace.absolute_sum = self.ersm;

        // round-off could be significant, allowing for radix 8 or 16 machines
        let up = self.ersm;
        let x = up + acc / 10.0;
        let mut fault = None;
        for rats in [1.0, 2.0, 4.0, 8.0] {
            if rats * x == rats * up {
                fault = Some(DaviesFault::RoundOff);
            }
        }

        Ok((qfval, fault))
    }
}
