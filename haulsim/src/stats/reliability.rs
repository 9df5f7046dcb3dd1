//! Replicated runs until the production metric settles, and the robust summary of the
//! replications.
//!
//! Stability is judged on a t predictive interval: its relative half-width must be small and
//! the median must stop moving between batches, for `consecutive` assessments in a row. The
//! reported value is the half-sample mode, bracketed by a percentile bootstrap interval.

use std::f64::consts::PI;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::ReliabilityConfig;
use crate::error::{EngineError, SimulationError};

const EPS: f64 = 1e-12;

fn ln_gamma(x: f64) -> f64 {
    // Lanczos, g = 7
    const C: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1. - x);
    }
    let x = x - 1.;
    let t = x + 7.5;
    let series = C.iter().enumerate().skip(1).fold(C[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2. * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const TINY: f64 = 1e-300;
    let (qab, qap, qam) = (a + b, a + 1., a - 1.);
    let mut c = 1.;
    let mut d = 1. - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1. / d;
    let mut h = d;
    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2. * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1. + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1. + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1. / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1. + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1. + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1. / d;
        let del = d * c;
        h *= del;
        if (del - 1.).abs() < 3e-16 {
            break;
        }
    }
    h
}

/// Regularised incomplete beta function I_x(a, b).
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0. {
        return 0.;
    }
    if x >= 1. {
        return 1.;
    }
    let front = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1. - x).ln()).exp();
    if x < (a + 1.) / (a + b + 2.) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1. - front * beta_continued_fraction(b, a, 1. - x) / b
    }
}

/// CDF of Student's t with `df` degrees of freedom.
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    let tail = 0.5 * incomplete_beta(df / 2., 0.5, df / (df + t * t));
    if t >= 0. { 1. - tail } else { tail }
}

/// Quantile of Student's t by bisection.
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if p == 0.5 {
        return 0.;
    }
    if p < 0.5 {
        return -student_t_quantile(1. - p, df);
    }
    let mut hi = 1.;
    while student_t_cdf(hi, df) < p && hi < 1e12 {
        hi *= 2.;
    }
    let mut lo = 0.;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

pub fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let mut v = xs.to_vec();
    v.sort_by(f64::total_cmp);
    let n = v.len();
    if n % 2 == 1 { v[n / 2] } else { 0.5 * (v[n / 2 - 1] + v[n / 2]) }
}

/// Linear-interpolation quantile of sorted data.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0., 1.) * (sorted.len() - 1) as f64;
    let (i, frac) = (pos.floor() as usize, pos.fract());
    match sorted.get(i + 1) {
        Some(next) => sorted[i] + frac * (next - sorted[i]),
        None => sorted[i],
    }
}

/// Two-sided `1 − α` prediction interval for one more observation.
pub fn predictive_interval_t(xs: &[f64], alpha: f64) -> (f64, f64) {
    let n = xs.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let m = mean(xs);
    if n == 1 {
        return (m, m);
    }
    let s = (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt();
    let t = student_t_quantile(1. - alpha / 2., (n - 1) as f64);
    let half = t * s * (1. + 1. / n as f64).sqrt();
    (m - half, m + half)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stability {
    pub stable: bool,
    pub median: f64,
    pub streak: usize,
    pub interval: (f64, f64),
}

pub fn assess_stability(
    values: &[f64],
    prev_median: Option<f64>,
    streak: usize,
    alpha: f64,
    r_target: f64,
    delta_target: f64,
    consecutive: usize,
) -> Stability {
    let (lo, hi) = predictive_interval_t(values, alpha);
    let med = median(values);
    let rel_half = 0.5 * (hi - lo) / med.abs().max(EPS);
    let rel_delta = prev_median.map(|p| (med - p).abs() / med.abs().max(EPS));
    let ok = rel_half <= r_target && rel_delta.is_some_and(|d| d <= delta_target);
    let streak = if ok { streak + 1 } else { 0 };
    let stable = streak >= consecutive;
    log::info!(
        "n={} median={:.3} tPI=[{:.3},{:.3}] rel_half={:.4} rel_delta={} ok={} streak={} stable={}",
        values.len(),
        med,
        lo,
        hi,
        rel_half,
        rel_delta.map(|d| format!("{:.4}", d)).unwrap_or_else(|| "-".into()),
        ok,
        streak,
        stable
    );
    Stability { stable, median: med, streak, interval: (lo, hi) }
}

/// Half-sample mode: repeatedly keeps the densest half of the sorted sample.
pub fn half_sample_mode(values: &[f64]) -> f64 {
    let mut y = values.to_vec();
    y.sort_by(f64::total_cmp);
    let mut y = y.as_slice();
    loop {
        let n = y.len();
        if n <= 2 {
            return if n == 0 { f64::NAN } else { mean(y) };
        }
        let k = n / 2;
        let j = (0..n - k).min_by(|&a, &b| (y[a + k] - y[a]).total_cmp(&(y[b + k] - y[b]))).unwrap_or(0);
        y = &y[j..j + k + n % 2];
    }
}

/// Percentile bounds of `b` bootstrap means.
pub fn bootstrap_interval(values: &[f64], alpha: f64, b: usize, rng: &mut SmallRng) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len();
    let mut means: Vec<f64> = (0..b.max(1))
        .map(|_| (0..n).map(|_| values[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(f64::total_cmp);
    (quantile_sorted(&means, alpha / 2.), quantile_sorted(&means, 1. - alpha / 2.))
}

/// Index of the run closest to `upper` from below, or the first run when none is below.
pub fn closest_below(values: &[f64], upper: f64) -> usize {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v <= upper)
        .min_by(|(_, a), (_, b)| (upper - **a).total_cmp(&(upper - **b)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Replication {
    pub seed: u64,
    pub metric: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityOutcome {
    pub runs: Vec<Replication>,
    pub stable: bool,
    pub reliable: f64,
    pub best_min: f64,
    pub best_max: f64,
    pub chosen_seed: u64,
}

/// Fills a batch of `count` successful replications. Failed seeds are logged and replaced
/// with fresh ones, at most `retries` times.
fn run_batch<F>(
    pool: &rayon::ThreadPool,
    count: usize,
    next_seed: &mut u64,
    retries: usize,
    run: &F,
) -> Result<Vec<Replication>, SimulationError>
where
    F: Fn(u64) -> Result<f64, SimulationError> + Sync,
{
    let mut done = Vec::with_capacity(count);
    let mut retries_left = retries;
    let mut wanted = count;
    loop {
        let seeds: Vec<u64> = (0..wanted).map(|k| *next_seed + k as u64).collect();
        *next_seed += wanted as u64;
        let results: Vec<(u64, Result<f64, SimulationError>)> =
            pool.install(|| seeds.par_iter().map(|s| (*s, run(*s))).collect());
        let mut last_err = None;
        for (seed, result) in results {
            match result {
                Ok(metric) => done.push(Replication { seed, metric }),
                Err(e) => {
                    log::error!("replication with seed {} failed: {}", seed, e.chain());
                    last_err = Some(e);
                }
            }
        }
        let missing = count - done.len();
        match last_err {
            None => return Ok(done),
            Some(e) if missing > retries_left => return Err(e),
            Some(_) => {
                retries_left -= missing;
                wanted = missing;
            }
        }
    }
}

/// Runs replications from `base_seed` upwards until the metric is stable or `max_runs` is
/// reached, then summarises them.
pub fn converge<F>(config: &ReliabilityConfig, base_seed: u64, run: F) -> Result<ReliabilityOutcome, SimulationError>
where
    F: Fn(u64) -> Result<f64, SimulationError> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.processes)
        .build()
        .map_err(|e| SimulationError::run(Some(base_seed), EngineError::Host(e.to_string())))?;

    let mut runs: Vec<Replication> = Vec::new();
    let mut next_seed = base_seed;
    let mut prev_median = None;
    let mut streak = 0;
    let mut stable = false;
    let mut batch = config.init_runs.min(config.max_runs);
    while batch > 0 {
        runs.extend(run_batch(&pool, batch, &mut next_seed, config.step_runs, &run)?);
        let values: Vec<f64> = runs.iter().map(|r| r.metric).collect();
        let s = assess_stability(
            &values,
            prev_median,
            streak,
            config.alpha,
            config.r_target,
            config.delta_target,
            config.consecutive,
        );
        prev_median = Some(s.median);
        streak = s.streak;
        stable = s.stable;
        if stable || runs.len() >= config.max_runs {
            break;
        }
        batch = config.step_runs.min(config.max_runs - runs.len());
    }

    let values: Vec<f64> = runs.iter().map(|r| r.metric).collect();
    let reliable = half_sample_mode(&values);
    let mut rng = SmallRng::seed_from_u64(base_seed);
    let (best_min, best_max) = bootstrap_interval(&values, config.alpha, config.boot_b, &mut rng);
    let chosen_seed = runs.get(closest_below(&values, best_max)).map(|r| r.seed).unwrap_or(base_seed);
    log::info!(
        "reliability over {} runs: value {:.3}, interval [{:.3}, {:.3}], stable {}, seed {} chosen",
        runs.len(),
        reliable,
        best_min,
        best_max,
        stable,
        chosen_seed
    );
    Ok(ReliabilityOutcome { runs, stable, reliable, best_min, best_max, chosen_seed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use crate::error::InputError;

    fn config() -> ReliabilityConfig {
        ReliabilityConfig {
            metric: Metric::Weight,
            processes: 2,
            init_runs: 4,
            step_runs: 4,
            max_runs: 12,
            alpha: 0.05,
            r_target: 0.05,
            delta_target: 0.01,
            consecutive: 2,
            boot_b: 500,
        }
    }

    #[test]
    fn t_quantiles_match_tables() {
        assert!((student_t_quantile(0.975, 1.) - 12.706).abs() < 1e-2);
        assert!((student_t_quantile(0.975, 10.) - 2.228).abs() < 1e-3);
        assert!((student_t_quantile(0.975, 1000.) - 1.962).abs() < 1e-3);
        assert!((student_t_quantile(0.025, 10.) + 2.228).abs() < 1e-3);
    }

    #[test]
    fn prediction_interval_edge_cases() {
        assert!(predictive_interval_t(&[], 0.05).0.is_nan());
        assert_eq!(predictive_interval_t(&[4.], 0.05), (4., 4.));
        let (lo, hi) = predictive_interval_t(&[1., 2., 3.], 0.05);
        // t(0.975, 2) = 4.303, s = 1
        assert!((hi - 2. - 4.303 * (4f64 / 3.).sqrt()).abs() < 1e-2);
        assert!((lo + hi - 4.).abs() < 1e-9);
    }

    #[test]
    fn constant_sample_stabilises_after_consecutive_checks() {
        let values = vec![100.; 15];
        let first = assess_stability(&values, None, 0, 0.05, 0.05, 0.01, 2);
        assert!(!first.stable);
        assert_eq!(first.streak, 0);
        let second = assess_stability(&values, Some(first.median), first.streak, 0.05, 0.05, 0.01, 2);
        assert_eq!(second.streak, 1);
        let third = assess_stability(&values, Some(second.median), second.streak, 0.05, 0.05, 0.01, 2);
        assert!(third.stable);
    }

    #[test]
    fn half_sample_mode_finds_the_cluster() {
        assert_eq!(half_sample_mode(&[5.]), 5.);
        assert_eq!(half_sample_mode(&[1., 3.]), 2.);
        let m = half_sample_mode(&[1., 10., 10.1, 10.2, 10.3, 30., 50.]);
        assert!((10.0..=10.3).contains(&m));
    }

    #[test]
    fn bootstrap_of_constant_is_the_constant() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(bootstrap_interval(&[7.; 5], 0.05, 100, &mut rng), (7., 7.));
    }

    #[test]
    fn closest_run_below_the_bound() {
        assert_eq!(closest_below(&[10., 14., 12., 20.], 15.), 1);
        assert_eq!(closest_below(&[30., 40.], 15.), 0);
    }

    #[test]
    fn converge_on_constant_metric() {
        let outcome = converge(&config(), 100, |_| Ok(500.)).unwrap();
        // 4 runs give no previous median, 8 and 12 pass, but the cap stops at 12
        assert_eq!(outcome.runs.len(), 12);
        assert!(outcome.stable);
        assert_eq!(outcome.reliable, 500.);
        assert_eq!(outcome.chosen_seed, 100);
    }

    #[test]
    fn failed_replications_are_retried() {
        let outcome = converge(&config(), 0, |seed| {
            if seed == 1 {
                Err(SimulationError::run(Some(seed), InputError::EmptyInput))
            } else {
                Ok(seed as f64)
            }
        })
        .unwrap();
        assert!(outcome.runs.iter().all(|r| r.seed != 1));
        assert_eq!(outcome.runs[..4].iter().map(|r| r.seed).collect::<Vec<_>>(), vec![0, 2, 3, 4]);
    }

    #[test]
    fn batch_that_cannot_fill_fails() {
        let err = converge(&config(), 0, |seed| Err(SimulationError::run(Some(seed), InputError::EmptyInput))).unwrap_err();
        assert!(err.seed().is_some());
    }
}
