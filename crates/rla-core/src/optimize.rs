// optimize.rs — Bounded one-dimensional maximization (golden-section search).

/// Result of a bounded maximization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Maximum {
    pub point: f64,
    pub value: f64,
    pub evaluations: usize,
    /// False when the evaluation budget ran out before the bracket shrank
    /// below the tolerance.
    pub converged: bool,
}

const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Maximize `f` over `[lo, hi]`. NaN values are treated as negative
/// infinity. The best point seen (including both endpoints) is returned.
pub fn maximize<F>(f: F, lo: f64, hi: f64, tol: f64, max_evals: usize) -> Maximum
where
    F: Fn(f64) -> f64,
{
    let eval = |x: f64| {
        let y = f(x);
        if y.is_nan() {
            f64::NEG_INFINITY
        } else {
            y
        }
    };

    let (mut a, mut b) = (lo, hi);
    let mut best = (a, eval(a));
    let mut evaluations = 1;
    let end = eval(b);
    evaluations += 1;
    if end > best.1 {
        best = (b, end);
    }

    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);
    evaluations += 2;

    while (b - a).abs() > tol && evaluations < max_evals {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = eval(d);
        }
        evaluations += 1;
    }

    for (x, y) in [(c, fc), (d, fd)] {
        if y > best.1 {
            best = (x, y);
        }
    }

    Maximum {
        point: best.0,
        value: best.1,
        evaluations,
        converged: (b - a).abs() <= tol,
    }
}
