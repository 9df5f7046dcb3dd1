//! Queueing-theory estimate of the fleet size that keeps the shovels at a target utilisation.
//!
//! Shovels and unloads are treated as G/G/c stations: waiting time comes from Erlang-C (M/M/c)
//! scaled with the Allen–Cunneen correction `(ca² + cs²) / 2`. The required fleet is then
//! Little's law over the whole cycle, `N = λ · T_cycle`.

use serde::Serialize;

use crate::error::EstimatorError;

/// Manoeuvring overhead per cycle, seconds.
pub const T_ROT: f64 = 15.;

/// Aggregated run statistics the estimator consumes. Variances are sample variances; a
/// missing value means fewer than two observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EstimatorInputs {
    pub target_shovel_utilisation: f64,
    pub duration: f64,
    pub shovels: usize,
    pub unloads: usize,
    pub mean_load: Option<f64>,
    pub var_load: Option<f64>,
    pub mean_unload: Option<f64>,
    pub var_unload: Option<f64>,
    pub mean_moving_loaded: Option<f64>,
    pub mean_moving_empty: Option<f64>,
    pub mean_shovel_wait: Option<f64>,
    pub var_shovel_wait: Option<f64>,
    pub mean_unload_wait: Option<f64>,
    pub var_unload_wait: Option<f64>,
    pub shovel_repair: f64,
    pub shovel_planned_idle: f64,
    pub shovel_blast_wait: f64,
    pub shovel_lunch: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub lambda: f64,
    pub wq_load: f64,
    pub wq_unload: f64,
    pub t_cycle: f64,
    pub trucks: f64,
}

/// Probability of waiting in an M/M/c queue.
pub fn erlang_c(lambda: f64, mu: f64, c: usize) -> f64 {
    let a = lambda / mu;
    let rho = lambda / (c as f64 * mu);
    if rho >= 1. {
        return 1.;
    }
    let mut sum = 0.;
    let mut term = 1.;
    for k in 0..c {
        if k > 0 {
            term *= a / k as f64;
        }
        sum += term;
    }
    // a^c / c! built incrementally to stay finite for large c
    let a_c_over_fact = (1..=c).fold(1., |acc, k| acc * a / k as f64);
    let tail = a_c_over_fact * (c as f64 / (c as f64 - a));
    tail / (sum + tail)
}

pub fn wq_allen_cunneen(lambda: f64, mu: f64, c: usize, ca2: f64, cs2: f64) -> Result<f64, EstimatorError> {
    let rho = lambda / (c as f64 * mu);
    if !(rho < 1.) {
        return Err(EstimatorError::Saturated(rho));
    }
    let wq_mm = erlang_c(lambda, mu, c) / (c as f64 * mu - lambda);
    Ok(0.5 * (ca2 + cs2) * wq_mm)
}

fn need(v: Option<f64>, name: &'static str) -> Result<f64, EstimatorError> {
    v.filter(|x| x.is_finite()).ok_or(EstimatorError::MissingStatistic(name))
}

fn ratio(num: f64, den: f64, what: &'static str) -> Result<f64, EstimatorError> {
    let r = num / den;
    if den == 0. || !r.is_finite() {
        return Err(EstimatorError::Degenerate(what));
    }
    Ok(r)
}

pub fn estimate(i: &EstimatorInputs) -> Result<Estimate, EstimatorError> {
    let t_load = need(i.mean_load, "mean_load")?;
    let t_unload = need(i.mean_unload, "mean_unload")?;
    let t_haul = need(i.mean_moving_loaded, "mean_moving_loaded")?;
    let t_return = need(i.mean_moving_empty, "mean_moving_empty")?;
    let mean_shovel_wait = need(i.mean_shovel_wait, "mean_shovel_wait")?;
    let mean_unload_wait = need(i.mean_unload_wait, "mean_unload_wait")?;

    let cs2_load = ratio(need(i.var_load, "var_load")?, t_load.powi(2), "load cv")?;
    let cs2_unload = ratio(need(i.var_unload, "var_unload")?, t_unload.powi(2), "unload cv")?;
    let ca2_load = ratio(need(i.var_shovel_wait, "var_shovel_wait")?, mean_shovel_wait.powi(2), "shovel arrival cv")?;
    let ca2_unload = ratio(need(i.var_unload_wait, "var_unload_wait")?, mean_unload_wait.powi(2), "unload arrival cv")?;

    if i.shovels == 0 || i.unloads == 0 {
        return Err(EstimatorError::Degenerate("no shovels or unloads"));
    }
    let m = i.shovels as f64;
    let mu_load = ratio(1., t_load, "load time")?;
    let mu_unload = ratio(1., t_unload, "unload time")?;
    let lost = i.shovel_repair + i.shovel_planned_idle + i.shovel_blast_wait + i.shovel_lunch;
    let u2 = 1. - ratio(lost, i.duration * m, "work duration")?;
    let lambda = i.target_shovel_utilisation * u2 * m * mu_load;

    let wq_load = wq_allen_cunneen(lambda, mu_load, i.shovels, ca2_load, cs2_load)?;
    let wq_unload = wq_allen_cunneen(lambda, mu_unload, i.unloads, ca2_unload, cs2_unload)?;
    let t_cycle = t_haul + t_return + t_load + t_unload + wq_load + wq_unload + T_ROT;
    let trucks = lambda * t_cycle;
    if !trucks.is_finite() {
        return Err(EstimatorError::Degenerate("non-finite result"));
    }
    Ok(Estimate { lambda, wq_load, wq_unload, t_cycle, trucks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> EstimatorInputs {
        EstimatorInputs {
            target_shovel_utilisation: 0.9,
            duration: 8. * 3600.,
            shovels: 2,
            unloads: 1,
            mean_load: Some(120.),
            var_load: Some(400.),
            mean_unload: Some(90.),
            var_unload: Some(100.),
            mean_moving_loaded: Some(600.),
            mean_moving_empty: Some(450.),
            mean_shovel_wait: Some(60.),
            var_shovel_wait: Some(900.),
            mean_unload_wait: Some(200.),
            var_unload_wait: Some(10_000.),
            ..Default::default()
        }
    }

    #[test]
    fn erlang_c_single_server_is_rho() {
        // for M/M/1, P(wait) = rho
        assert!((erlang_c(0.5, 1., 1) - 0.5).abs() < 1e-12);
        assert_eq!(erlang_c(2., 1., 1), 1.);
    }

    #[test]
    fn estimate_is_little_law() {
        let e = estimate(&inputs()).unwrap();
        assert!((e.lambda - 0.9 * 2. / 120.).abs() < 1e-12);
        assert!((e.trucks - e.lambda * e.t_cycle).abs() < 1e-9);
        assert!(e.t_cycle > 600. + 450. + 120. + 90. + T_ROT);
    }

    #[test]
    fn saturated_unload_is_an_error() {
        let mut i = inputs();
        i.mean_unload = Some(200.);
        assert!(matches!(estimate(&i), Err(EstimatorError::Saturated(_))));
    }

    #[test]
    fn missing_statistic_is_an_error() {
        let mut i = inputs();
        i.var_load = None;
        assert_eq!(estimate(&i), Err(EstimatorError::MissingStatistic("var_load")));
    }
}
