//! # Bounded Minimizers
//!
//! Two small box-constrained solvers over fixed-size parameter vectors:
//! a derivative-free Nelder–Mead simplex for the fundamental search, whose
//! objective is piecewise constant, and a projected Levenberg–Marquardt
//! least-squares solver for the peak fits.

use crate::error::FitError;

/// Box constraints `lower[i] <= x[i] <= upper[i]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<const N: usize> {
    pub lower: [f64; N],
    pub upper: [f64; N],
}

impl<const N: usize> Bounds<N> {
    pub fn new(lower: [f64; N], upper: [f64; N]) -> Self {
        Self { lower, upper }
    }

    pub fn clamp(&self, x: [f64; N]) -> [f64; N] {
        std::array::from_fn(|i| x[i].clamp(self.lower[i], self.upper[i]))
    }

    pub fn contains(&self, x: &[f64; N]) -> bool {
        (0..N).all(|i| self.lower[i] <= x[i] && x[i] <= self.upper[i])
    }

    fn span(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    /// Maps unit-cube coordinates onto the box.
    pub fn denormalize(&self, u: &[f64; N]) -> [f64; N] {
        std::array::from_fn(|i| self.lower[i] + u[i].clamp(0.0, 1.0) * self.span(i))
    }

    pub fn normalize(&self, x: &[f64; N]) -> [f64; N] {
        std::array::from_fn(|i| {
            let span = self.span(i);
            if span > 0.0 { ((x[i] - self.lower[i]) / span).clamp(0.0, 1.0) } else { 0.0 }
        })
    }
}

/// Location and value of a minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimum<const N: usize> {
    pub x: [f64; N],
    pub value: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    pub max_iterations: usize,
    /// Initial simplex edge length in unit-cube coordinates.
    pub initial_step: f64,
    /// Stop once the simplex is smaller than this (unit-cube coordinates)...
    pub x_tolerance: f64,
    /// ...and its vertex values are this close.
    pub f_tolerance: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            initial_step: 0.05,
            x_tolerance: 1e-4,
            f_tolerance: 1e-9,
        }
    }
}

/// Nelder–Mead restricted to a box.
///
/// The simplex lives in the unit cube spanned by `bounds`; every trial point
/// is projected back into the cube before evaluation, so `f` is never called
/// outside the bounds.
pub fn nelder_mead<const N: usize, F>(
    f: F,
    x0: [f64; N],
    bounds: &Bounds<N>,
    options: &NelderMeadOptions,
) -> Minimum<N>
where
    F: Fn(&[f64; N]) -> f64,
{
    let eval = |u: &[f64; N]| f(&bounds.denormalize(u));
    let project = |u: [f64; N]| -> [f64; N] { std::array::from_fn(|i| u[i].clamp(0.0, 1.0)) };

    let start = bounds.normalize(&x0);
    let mut simplex: Vec<([f64; N], f64)> = Vec::with_capacity(N + 1);
    simplex.push((start, eval(&start)));
    for i in 0..N {
        let mut vertex = start;
        vertex[i] = if start[i] + options.initial_step <= 1.0 {
            start[i] + options.initial_step
        } else {
            start[i] - options.initial_step
        };
        simplex.push((vertex, eval(&vertex)));
    }

    let mut iterations = 0;
    while iterations < options.max_iterations {
        iterations += 1;
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let (best, best_val) = simplex[0];
        let (worst, worst_val) = simplex[N];
        let size = simplex
            .iter()
            .skip(1)
            .flat_map(|(v, _)| (0..N).map(move |i| (v[i] - best[i]).abs()))
            .fold(0.0, f64::max);
        if size < options.x_tolerance && (worst_val - best_val).abs() <= options.f_tolerance {
            break;
        }

        let centroid: [f64; N] =
            std::array::from_fn(|i| simplex[..N].iter().map(|(v, _)| v[i]).sum::<f64>() / N as f64);
        let along = |t: f64| project(std::array::from_fn(|i| centroid[i] + t * (worst[i] - centroid[i])));

        let reflected = along(-1.0);
        let reflected_val = eval(&reflected);
        let second_worst_val = simplex[N - 1].1;

        if reflected_val < best_val {
            let expanded = along(-2.0);
            let expanded_val = eval(&expanded);
            simplex[N] = if expanded_val < reflected_val {
                (expanded, expanded_val)
            } else {
                (reflected, reflected_val)
            };
            continue;
        }
        if reflected_val < second_worst_val {
            simplex[N] = (reflected, reflected_val);
            continue;
        }

        let (contracted, contracted_val) = if reflected_val < worst_val {
            let c = along(-0.5);
            (c, eval(&c))
        } else {
            let c = along(0.5);
            (c, eval(&c))
        };
        if contracted_val < worst_val.min(reflected_val) {
            simplex[N] = (contracted, contracted_val);
            continue;
        }

        // Shrink towards the best vertex.
        for vertex in simplex.iter_mut().skip(1) {
            let shrunk: [f64; N] = std::array::from_fn(|i| best[i] + 0.5 * (vertex.0[i] - best[i]));
            *vertex = (shrunk, eval(&shrunk));
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (u, value) = simplex[0];
    Minimum {
        x: bounds.denormalize(&u),
        value,
        iterations,
    }
}

/// Solves `a · x = b` by Gaussian elimination with partial pivoting.
fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Residuals `model - data` and their Jacobian rows at a parameter vector.
pub struct Linearization<const N: usize> {
    pub residuals: Vec<f64>,
    pub jacobian: Vec<[f64; N]>,
}

const LM_MAX_LAMBDA: f64 = 1e12;

/// Projected Levenberg–Marquardt least squares.
///
/// Steps are clamped into `bounds`. Convergence means a negligible relative
/// cost decrease, a negligible relative step, or no improving step left even
/// with a huge damping factor; running out of iterations is reported as [`FitError::NotConverged`].
pub fn levenberg_marquardt<const N: usize, F>(
    linearize: F,
    p0: [f64; N],
    bounds: &Bounds<N>,
    max_iterations: usize,
) -> Result<Minimum<N>, FitError>
where
    F: Fn(&[f64; N]) -> Linearization<N>,
{
    let cost_of = |lin: &Linearization<N>| lin.residuals.iter().map(|r| r * r).sum::<f64>();

    let mut p = bounds.clamp(p0);
    let mut lin = linearize(&p);
    let mut cost = cost_of(&lin);
    if !cost.is_finite() {
        return Err(FitError::Degenerate("non-finite initial cost"));
    }
    let mut lambda = 1e-3;

    for iteration in 1..=max_iterations {
        let mut jtj = [[0.0; N]; N];
        let mut jtr = [0.0; N];
        for (row, r) in lin.jacobian.iter().zip(&lin.residuals) {
            for i in 0..N {
                jtr[i] -= row[i] * r;
                for j in 0..N {
                    jtj[i][j] += row[i] * row[j];
                }
            }
        }

        let mut improved = false;
        while lambda <= LM_MAX_LAMBDA {
            let mut damped = jtj;
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += lambda * jtj[i][i].max(1e-12);
            }
            let Some(step) = solve(damped, jtr) else {
                lambda *= 10.0;
                continue;
            };
            let candidate = bounds.clamp(std::array::from_fn(|i| p[i] + step[i]));
            let candidate_lin = linearize(&candidate);
            let candidate_cost = cost_of(&candidate_lin);
            if candidate_cost.is_finite() && candidate_cost < cost {
                let decrease = cost - candidate_cost;
                let settled = (0..N).all(|i| (candidate[i] - p[i]).abs() <= 1e-10 * (p[i].abs() + 1e-10));
                p = candidate;
                lin = candidate_lin;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                improved = true;
                if settled || decrease <= 1e-12 * cost.max(f64::MIN_POSITIVE) {
                    return Ok(Minimum { x: p, value: cost, iterations: iteration });
                }
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            return Ok(Minimum { x: p, value: cost, iterations: iteration });
        }
    }

    Err(FitError::NotConverged(max_iterations))
}
