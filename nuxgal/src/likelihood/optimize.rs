//! Derivative-free minimization on the unit box.
//!
//! Nelder–Mead with every trial point projected onto [0, 1]^n. The
//! objective is treated as a black box; non-finite values count as worse
//! than any finite one.

use serde::{Deserialize, Serialize};

/// Stopping criteria for one Nelder–Mead run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NelderMeadOptions {
    /// Budget of objective evaluations
    pub max_evaluations: usize,
    /// Simplex size in parameter space at convergence
    pub xtol: f64,
    /// Spread of objective values at convergence
    pub ftol: f64,
    /// Edge length of the initial simplex
    pub initial_step: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            xtol: 1e-6,
            ftol: 1e-8,
            initial_step: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NelderMeadResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub converged: bool,
    pub evaluations: usize,
}

fn project(x: &mut [f64]) {
    for v in x.iter_mut() {
        *v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
    }
}

/// Objective wrapper counting evaluations; NaN ranks as +inf.
struct Counted<F> {
    objective: F,
    evaluations: usize,
}

impl<F: FnMut(&[f64]) -> f64> Counted<F> {
    fn eval(&mut self, x: &[f64]) -> f64 {
        self.evaluations += 1;
        let value = (self.objective)(x);
        if value.is_nan() {
            f64::INFINITY
        } else {
            value
        }
    }
}

/// Minimize `objective` over [0, 1]^n starting from `start`.
pub fn minimize_in_unit_box<F>(objective: F, start: &[f64], options: &NelderMeadOptions) -> NelderMeadResult
where
    F: FnMut(&[f64]) -> f64,
{
    let n = start.len();
    let mut counted = Counted {
        objective,
        evaluations: 0,
    };

    let mut origin = start.to_vec();
    project(&mut origin);

    if n == 0 {
        let value = counted.eval(&origin);
        return NelderMeadResult {
            x: origin,
            value,
            converged: true,
            evaluations: 1,
        };
    }

    // Initial simplex: step along each axis, backwards when the box edge is near
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    let value = counted.eval(&origin);
    simplex.push((origin.clone(), value));
    for i in 0..n {
        let mut vertex = origin.clone();
        vertex[i] = if vertex[i] + options.initial_step <= 1.0 {
            vertex[i] + options.initial_step
        } else {
            vertex[i] - options.initial_step
        };
        project(&mut vertex);
        let value = counted.eval(&vertex);
        simplex.push((vertex, value));
    }

    let mut converged = false;
    loop {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let best = &simplex[0];
        let f_spread = simplex.iter().map(|v| (v.1 - best.1).abs()).fold(0.0, f64::max);
        let x_spread = simplex
            .iter()
            .flat_map(|v| v.0.iter().zip(&best.0).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if f_spread <= options.ftol && x_spread <= options.xtol {
            converged = true;
            break;
        }
        if counted.evaluations >= options.max_evaluations {
            break;
        }

        let centroid: Vec<f64> = (0..n)
            .map(|i| simplex[..n].iter().map(|v| v.0[i]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();
        let along = |t: f64| -> Vec<f64> {
            let mut p: Vec<f64> = centroid
                .iter()
                .zip(&worst.0)
                .map(|(c, w)| c + t * (c - w))
                .collect();
            project(&mut p);
            p
        };

        let reflected = along(1.0);
        let f_reflected = counted.eval(&reflected);

        if f_reflected < simplex[0].1 {
            let expanded = along(2.0);
            let f_expanded = counted.eval(&expanded);
            simplex[n] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }
        if f_reflected < simplex[n - 1].1 {
            simplex[n] = (reflected, f_reflected);
            continue;
        }

        // Contraction, outside if the reflection improved on the worst point
        let (contracted, f_contracted) = if f_reflected < worst.1 {
            let p = along(0.5);
            let f = counted.eval(&p);
            (p, f)
        } else {
            let p = along(-0.5);
            let f = counted.eval(&p);
            (p, f)
        };
        if f_contracted < worst.1.min(f_reflected) {
            simplex[n] = (contracted, f_contracted);
            continue;
        }

        // Shrink towards the best vertex
        let best_x = simplex[0].0.clone();
        for vertex in simplex.iter_mut().skip(1) {
            let mut p: Vec<f64> = best_x
                .iter()
                .zip(&vertex.0)
                .map(|(b, v)| b + 0.5 * (v - b))
                .collect();
            project(&mut p);
            let value = counted.eval(&p);
            *vertex = (p, value);
        }
    }

    let (x, value) = simplex.swap_remove(0);
    NelderMeadResult {
        x,
        value,
        converged,
        evaluations: counted.evaluations,
    }
}
