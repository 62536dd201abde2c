const SCAN_POINTS: usize = 32;
const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Finds `x` in `[lower, upper]` minimising `f`.
///
/// A coarse scan picks the best sample, then golden-section search refines
/// the bracket around it until it is narrower than `tolerance`. The scan keeps
/// the search from settling in a far local minimum when `f` is not unimodal.
/// Non-finite values of `f` count as worse than any finite value.
pub fn minimize_bounded<F>(mut f: F, lower: f64, upper: f64, tolerance: f64) -> f64
where
    F: FnMut(f64) -> f64,
{
    if !(upper > lower) {
        return lower;
    }

    let mut eval = |x: f64| {
        let value = f(x);
        if value.is_finite() { value } else { f64::INFINITY }
    };

    let step = (upper - lower) / SCAN_POINTS as f64;
    let (mut best_x, mut best) = (lower, eval(lower));
    let mut best_index = 0;
    for i in 1..=SCAN_POINTS {
        let x = lower + step * i as f64;
        let value = eval(x);
        if value < best {
            best = value;
            best_x = x;
            best_index = i;
        }
    }

    let mut a = lower + step * best_index.saturating_sub(1) as f64;
    let mut b = (lower + step * (best_index + 1) as f64).min(upper);
    let tolerance = tolerance.max(f64::EPSILON);

    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);
    while b - a > tolerance {
        if fc < fd {
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
    }

    let x = (a + b) / 2.0;
    if eval(x) <= best { x } else { best_x }
}
